// 基于 ratatui + crossterm 的个人闪卡复习 TUI
// 功能：
// - 从内容目录（index.json + 每分类一个 .md）解析闪卡，日期标记分桶编号
// - 筛选管线：分类 / 最近一周 / 收藏 / 理解度 / 回收站，顺序或随机复习
// - 收藏、理解度、回收站标注通过 GitHub Gist 私有文档同步，旧 ID 装载时迁移
// - 管理弹窗：搜索、多选、批量标注与组合排序；[G] 配置令牌
// - 维护命令：--write-index 重建清单，--merge-sources 合并按日源目录

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::Deserialize;
use tui_textarea::TextArea;
use unicode_width::UnicodeWidthChar;

mod card;
mod content;
mod deck;
mod gist;
mod migrate;
mod parser;
mod store;

use card::{
    Card, Category, DateFilterMode, FavoriteFilterMode, FavoriteItem, OrderMode, TrashFilterMode,
    TrashItem, UnderstandingItem, UnderstandingLevel,
};
use deck::{DeckQuery, ManageSort, ShuffleState, SortKey};
use gist::GistClient;
use store::{AnnotationStore, SessionStore};

#[derive(Debug, Clone, Parser)]
#[command(name = "quizcard-tui", about = "个人闪卡复习 TUI 工具", version)]
struct Cli {
    /// 内容目录（含 index.json 与各分类 .md），默认自动探测或环境变量 QUIZCARD_CONTENT
    #[arg(long, short = 'c')]
    content: Option<PathBuf>,

    /// 会话状态文件路径，环境变量 QUIZCARD_STATE 亦可，默认 <内容目录>/quizcard-state.json
    #[arg(long)]
    state: Option<PathBuf>,

    /// 启动时勾选的分类（可多次传入），默认全部
    #[arg(long = "category", action = ArgAction::Append)]
    categories: Vec<String>,

    /// 启动即开启最近一周过滤
    #[arg(long, action = ArgAction::SetTrue)]
    week: bool,

    /// 启动即随机顺序
    #[arg(long, action = ArgAction::SetTrue)]
    random: bool,

    /// 扫描内容目录重建 index.json 后退出
    #[arg(long = "write-index", action = ArgAction::SetTrue)]
    write_index: bool,

    /// 把按日拆分的源目录合并为分类文档后退出
    #[arg(long = "merge-sources", action = ArgAction::SetTrue)]
    merge_sources: bool,

    /// 日志文件路径（也可用环境变量 QUIZCARD_LOG），不设则不落日志
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,

    /// 主题（外观）：dark | light
    #[arg(long = "theme", value_enum, default_value_t = ThemeKind::Dark)]
    theme: ThemeKind,
}

// ---------------- 应用状态 ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Sidebar,
    Card,
}

#[derive(Debug)]
struct TokenDialog {
    textarea: TextArea<'static>,
}

#[derive(Debug)]
struct ManagerState {
    rows: Vec<usize>, // cards 下标，已过滤排序
    list_state: ListState,
    selected: HashSet<usize>, // cards 下标
    search: Option<String>,
    search_active: bool,
    category: Option<String>, // None = 全部分类
    sort: ManageSort,
}

#[derive(Debug)]
struct App {
    categories: Vec<Category>,
    cards: Vec<Card>,    // 扁平化全集
    visible: Vec<usize>, // 过滤后保留的 cards 下标
    pos: usize,          // 卡组内位置（随机模式下经排列映射）
    show_explanation: bool,
    query: DeckQuery,
    order: OrderMode,
    shuffle: ShuffleState,
    favorites: AnnotationStore<FavoriteItem>,
    understandings: AnnotationStore<UnderstandingItem>,
    trash: AnnotationStore<TrashItem>,
    client: Option<GistClient>,
    session: SessionStore,
    status: Option<String>,
    theme: Theme,
    keymap: HashMap<char, KeyAction>,
    focus: Focus,
    sidebar_state: ListState,
    manager: Option<ManagerState>,
    token_dialog: Option<TokenDialog>,
    content_dir: PathBuf,
}

impl App {
    fn new(
        categories: Vec<Category>,
        content_dir: PathBuf,
        session: SessionStore,
        theme: Theme,
        keymap: HashMap<char, KeyAction>,
        cli: &Cli,
    ) -> Self {
        let cards = deck::flatten(&categories);
        let mut query = DeckQuery::default();
        for name in &cli.categories {
            if categories.iter().any(|c| &c.name == name) {
                query.categories.insert(name.clone());
            }
        }
        if cli.week {
            query.date_filter = DateFilterMode::Week;
        }
        let order = if cli.random {
            OrderMode::Random
        } else {
            OrderMode::Sequential
        };
        let mut app = Self {
            categories,
            cards,
            visible: vec![],
            pos: 0,
            show_explanation: false,
            query,
            order,
            shuffle: ShuffleState::default(),
            favorites: AnnotationStore::new(),
            understandings: AnnotationStore::new(),
            trash: AnnotationStore::new(),
            client: None,
            session,
            status: None,
            theme,
            keymap,
            focus: Focus::Card,
            sidebar_state: ListState::default(),
            manager: None,
            token_dialog: None,
            content_dir,
        };
        rebuild_visible(&mut app);
        if !app.categories.is_empty() {
            app.sidebar_state.select(Some(0));
        }
        app
    }

    /// 当前展示的卡。随机模式经排列映射到 visible 下标
    fn current_card(&self) -> Option<&Card> {
        if self.visible.is_empty() {
            return None;
        }
        let vis_pos = match self.order {
            OrderMode::Sequential => self.pos,
            OrderMode::Random => self.shuffle.map(self.pos)?,
        };
        self.visible.get(vis_pos).map(|&i| &self.cards[i])
    }
}

// 重算可见卡组并收敛位置；过滤条件变化由各动作自己把 pos 归零
fn rebuild_visible(app: &mut App) {
    app.visible = deck::filter_deck(
        &app.cards,
        &app.query,
        app.favorites.items(),
        app.understandings.items(),
        app.trash.items(),
    );
    if app.order == OrderMode::Random {
        app.shuffle.ensure(app.visible.len());
    }
    if app.pos >= app.visible.len() {
        app.pos = app.visible.len().saturating_sub(1);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let content_dir = default_content_dir(&cli);

    // 维护命令不进 TUI
    if cli.write_index {
        let index = content::write_index(&content_dir)?;
        println!("已重建清单: {} 个分类", index.categories.len());
        return Ok(());
    }
    if cli.merge_sources {
        let merged = content::merge_sources(&content_dir)?;
        for (name, path) in &merged {
            println!("已合并 {} -> {}", name, path.display());
        }
        println!("共合并 {} 个分类目录", merged.len());
        return Ok(());
    }

    let categories = content::load_categories(&content_dir);
    let keymap = load_keymap().unwrap_or_else(|_| default_keymap());
    let state_path = cli
        .state
        .clone()
        .or_else(|| std::env::var("QUIZCARD_STATE").ok().map(PathBuf::from))
        .unwrap_or_else(|| content_dir.join("quizcard-state.json"));
    let session = SessionStore::open(state_path);

    let mut app = App::new(
        categories,
        content_dir,
        session,
        theme_of(cli.theme),
        keymap,
        &cli,
    );
    // 有存盘令牌就在进终端前把标注拉齐
    connect_remote(&mut app);

    // TUI 初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    // 退出还原
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;
        if event::poll(Duration::from_millis(200))? {
            match event::read()? {
                Event::Key(k) => {
                    // 弹窗优先：令牌输入 > 管理列表 > 主界面
                    if app.token_dialog.is_some() {
                        handle_token_dialog_key(app, k)?;
                        continue;
                    }
                    if app.manager.is_some() {
                        handle_manager_key(app, k)?;
                        continue;
                    }
                    if handle_key(app, k)? {
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return Ok(true);
        }
        KeyCode::Char('q') => return Ok(true),
        KeyCode::Esc => {
            app.status = None;
        }
        KeyCode::Tab => {
            app.focus = match app.focus {
                Focus::Sidebar => Focus::Card,
                Focus::Card => Focus::Sidebar,
            };
        }
        KeyCode::Down => match app.focus {
            Focus::Sidebar => move_sidebar_selection(app, 1),
            Focus::Card => next_card(app),
        },
        KeyCode::Up => match app.focus {
            Focus::Sidebar => move_sidebar_selection(app, -1),
            Focus::Card => prev_card(app),
        },
        KeyCode::Home => match app.focus {
            Focus::Sidebar => {
                if !app.categories.is_empty() {
                    app.sidebar_state.select(Some(0));
                }
            }
            Focus::Card => jump_to_start(app),
        },
        KeyCode::Right => match app.focus {
            Focus::Sidebar => select_only_category(app),
            Focus::Card => next_card(app),
        },
        KeyCode::Left if app.focus == Focus::Card => prev_card(app),
        KeyCode::Enter | KeyCode::Char(' ') => match app.focus {
            Focus::Sidebar => toggle_category(app),
            Focus::Card => toggle_explanation(app),
        },
        KeyCode::Char(ch) => {
            if let Some(action) = app.keymap.get(&ch).copied() {
                apply_action(app, action)?;
            }
        }
        _ => {}
    }
    Ok(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyAction {
    NextCard,
    PrevCard,
    ToggleExplanation,
    ToggleFavorite,
    SetLevelLow,
    SetLevelMedium,
    SetLevelHigh,
    ClearLevel,
    TrashCard,
    RestoreCard,
    // 过滤
    CycleFavoriteFilter,
    ToggleWeekFilter,
    ToggleTrashView,
    FilterLevelLow,
    FilterLevelMedium,
    FilterLevelHigh,
    ClearCategorySelection,
    // 顺序
    ToggleOrder,
    Reshuffle,
    // 弹窗与远端
    OpenManager,
    OpenTokenDialog,
    Reload,
    SyncAnnotations,
}

fn apply_action(app: &mut App, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::NextCard => next_card(app),
        KeyAction::PrevCard => prev_card(app),
        KeyAction::ToggleExplanation => toggle_explanation(app),
        KeyAction::ToggleFavorite => toggle_favorite(app)?,
        KeyAction::SetLevelLow => set_level(app, UnderstandingLevel::Low)?,
        KeyAction::SetLevelMedium => set_level(app, UnderstandingLevel::Medium)?,
        KeyAction::SetLevelHigh => set_level(app, UnderstandingLevel::High)?,
        KeyAction::ClearLevel => clear_level(app)?,
        KeyAction::TrashCard => trash_current(app, true)?,
        KeyAction::RestoreCard => trash_current(app, false)?,
        KeyAction::CycleFavoriteFilter => cycle_favorite_filter(app),
        KeyAction::ToggleWeekFilter => toggle_week_filter(app),
        KeyAction::ToggleTrashView => toggle_trash_view(app),
        KeyAction::FilterLevelLow => toggle_level_filter(app, UnderstandingLevel::Low),
        KeyAction::FilterLevelMedium => toggle_level_filter(app, UnderstandingLevel::Medium),
        KeyAction::FilterLevelHigh => toggle_level_filter(app, UnderstandingLevel::High),
        KeyAction::ClearCategorySelection => clear_category_selection(app),
        KeyAction::ToggleOrder => toggle_order(app),
        KeyAction::Reshuffle => reshuffle(app),
        KeyAction::OpenManager => open_manager(app),
        KeyAction::OpenTokenDialog => open_token_dialog(app),
        KeyAction::Reload => reload_content(app),
        KeyAction::SyncAnnotations => sync_annotations(app),
    }
    Ok(())
}

// ---------------- 复习动作 ----------------

fn next_card(app: &mut App) {
    let n = app.visible.len();
    if n == 0 {
        return;
    }
    app.pos = (app.pos + 1) % n;
    app.show_explanation = false;
}

fn prev_card(app: &mut App) {
    let n = app.visible.len();
    if n == 0 {
        return;
    }
    app.pos = (app.pos + n - 1) % n;
    app.show_explanation = false;
}

fn jump_to_start(app: &mut App) {
    if app.visible.is_empty() {
        return;
    }
    app.pos = 0;
    app.show_explanation = false;
}

fn toggle_explanation(app: &mut App) {
    if app
        .current_card()
        .map_or(false, |c| c.explanation.is_some())
    {
        app.show_explanation = !app.show_explanation;
    }
}

fn move_sidebar_selection(app: &mut App, delta: isize) {
    let n = app.categories.len();
    if n == 0 {
        return;
    }
    let cur = app.sidebar_state.selected().unwrap_or(0) as isize;
    let next = (cur + delta).clamp(0, n as isize - 1) as usize;
    app.sidebar_state.select(Some(next));
}

fn toggle_category(app: &mut App) {
    let Some(name) = app
        .sidebar_state
        .selected()
        .and_then(|sel| app.categories.get(sel))
        .map(|c| c.name.clone())
    else {
        return;
    };
    if !app.query.categories.insert(name.clone()) {
        app.query.categories.remove(&name);
    }
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

/// 只看光标所在的分类（清掉其它勾选）
fn select_only_category(app: &mut App) {
    let Some(name) = app
        .sidebar_state
        .selected()
        .and_then(|sel| app.categories.get(sel))
        .map(|c| c.name.clone())
    else {
        return;
    };
    app.query.categories.clear();
    app.query.categories.insert(name);
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn clear_category_selection(app: &mut App) {
    if app.query.categories.is_empty() {
        return;
    }
    app.query.categories.clear();
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn toggle_week_filter(app: &mut App) {
    app.query.date_filter = app.query.date_filter.toggle();
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn cycle_favorite_filter(app: &mut App) {
    if app.client.is_none() {
        app.status = Some("收藏过滤需要先连接 GitHub（[G] 配置令牌）".into());
        return;
    }
    app.query.favorite_filter = app.query.favorite_filter.next();
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn toggle_level_filter(app: &mut App, level: UnderstandingLevel) {
    if app.client.is_none() {
        app.status = Some("理解度过滤需要先连接 GitHub（[G] 配置令牌）".into());
        return;
    }
    if !app.query.levels.insert(level) {
        app.query.levels.remove(&level);
    }
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn toggle_trash_view(app: &mut App) {
    if app.client.is_none() {
        app.status = Some("回收站视图需要先连接 GitHub（[G] 配置令牌）".into());
        return;
    }
    app.query.trash_filter = app.query.trash_filter.toggle();
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
}

fn toggle_order(app: &mut App) {
    app.order = app.order.toggle();
    if app.order == OrderMode::Random {
        app.shuffle.ensure(app.visible.len());
    }
    app.show_explanation = false;
    app.status = Some(format!("顺序: {}", app.order.as_str()));
}

fn reshuffle(app: &mut App) {
    if app.order != OrderMode::Random {
        app.status = Some("先用 [o] 切到随机顺序再重洗".into());
        return;
    }
    app.shuffle.reshuffle(app.visible.len());
    app.pos = 0;
    app.show_explanation = false;
    app.status = Some("已重洗当前卡组".into());
}

fn reload_content(app: &mut App) {
    app.categories = content::load_categories(&app.content_dir);
    app.cards = deck::flatten(&app.categories);
    // 清理已消失分类上的勾选
    app.query
        .categories
        .retain(|name| app.categories.iter().any(|c| &c.name == name));
    if app
        .sidebar_state
        .selected()
        .map_or(true, |sel| sel >= app.categories.len())
    {
        app.sidebar_state.select(if app.categories.is_empty() {
            None
        } else {
            Some(0)
        });
    }
    app.pos = 0;
    app.show_explanation = false;
    rebuild_visible(app);
    app.status = Some(format!(
        "重新载入 {} 个分类 / {} 张卡",
        app.categories.len(),
        app.cards.len()
    ));
}

// ---------------- 标注动作 ----------------

const NO_TOKEN_HINT: &str = "未连接 GitHub，先用 [G] 配置令牌";

fn toggle_favorite(app: &mut App) -> Result<()> {
    let Some(card_id) = app.current_card().map(|c| c.id.clone()) else {
        return Ok(());
    };
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let res = if app.favorites.contains(&card_id) {
        app.favorites.remove(&card_id, &client, &mut app.session)
    } else {
        app.favorites
            .upsert(FavoriteItem::new(card_id), &client, &mut app.session)
    };
    if let Err(err) = res {
        tracing::warn!(error = %err, "收藏写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    }
    rebuild_visible(app);
    Ok(())
}

fn set_level(app: &mut App, level: UnderstandingLevel) -> Result<()> {
    let Some(card_id) = app.current_card().map(|c| c.id.clone()) else {
        return Ok(());
    };
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let item = UnderstandingItem::new(card_id, level);
    if let Err(err) = app.understandings.upsert(item, &client, &mut app.session) {
        tracing::warn!(error = %err, "理解度写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    }
    rebuild_visible(app);
    Ok(())
}

fn clear_level(app: &mut App) -> Result<()> {
    let Some(card_id) = app.current_card().map(|c| c.id.clone()) else {
        return Ok(());
    };
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    if let Err(err) = app
        .understandings
        .remove(&card_id, &client, &mut app.session)
    {
        tracing::warn!(error = %err, "理解度清除远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    }
    rebuild_visible(app);
    Ok(())
}

fn trash_current(app: &mut App, into: bool) -> Result<()> {
    let Some(card_id) = app.current_card().map(|c| c.id.clone()) else {
        return Ok(());
    };
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let res = if into {
        if app.trash.contains(&card_id) {
            Ok(())
        } else {
            app.trash
                .upsert(TrashItem::new(card_id), &client, &mut app.session)
        }
    } else {
        app.trash.remove(&card_id, &client, &mut app.session)
    };
    if let Err(err) = res {
        tracing::warn!(error = %err, "回收站写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    }
    rebuild_visible(app);
    Ok(())
}

// ---------------- 远端连接 ----------------

fn connect_remote(app: &mut App) {
    let Some(token) = app.session.data.github_token.clone() else {
        return;
    };
    match GistClient::new(token) {
        Ok(client) => {
            app.client = Some(client);
            load_annotations(app);
        }
        Err(err) => {
            tracing::warn!(error = %err, "创建 GitHub 客户端失败");
            app.status = Some(format!("GitHub 连接失败: {}", err));
        }
    }
}

fn load_annotations(app: &mut App) {
    let Some(client) = app.client.clone() else {
        return;
    };
    let mut failures: Vec<String> = Vec::new();
    if let Err(err) = app.favorites.load(&client, &mut app.session) {
        tracing::warn!(error = %err, "收藏装载失败");
        failures.push(format!("收藏: {}", err));
    }
    if let Err(err) = app.understandings.load(&client, &mut app.session) {
        tracing::warn!(error = %err, "理解度装载失败");
        failures.push(format!("理解度: {}", err));
    }
    if let Err(err) = app.trash.load(&client, &mut app.session) {
        tracing::warn!(error = %err, "回收站装载失败");
        failures.push(format!("回收站: {}", err));
    }
    if failures.is_empty() {
        app.status = Some(format!(
            "远端标注已同步（收藏 {} / 理解度 {} / 回收站 {}）",
            app.favorites.len(),
            app.understandings.len(),
            app.trash.len()
        ));
    } else {
        app.status = Some(format!("部分标注装载失败: {}", failures.join("; ")));
    }
    rebuild_visible(app);
}

fn sync_annotations(app: &mut App) {
    if app.client.is_none() {
        app.status = Some(NO_TOKEN_HINT.into());
        return;
    }
    load_annotations(app);
}

// ---------------- 令牌弹窗 ----------------

fn open_token_dialog(app: &mut App) {
    let textarea = match &app.session.data.github_token {
        Some(token) => TextArea::from(vec![token.clone()]),
        None => TextArea::default(),
    };
    app.token_dialog = Some(TokenDialog { textarea });
}

fn handle_token_dialog_key(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Esc => {
            app.token_dialog = None;
        }
        KeyCode::Enter => {
            let Some(dialog) = app.token_dialog.take() else {
                return Ok(());
            };
            let token = dialog.textarea.lines().join("").trim().to_string();
            submit_token(app, token)?;
        }
        _ => {
            if let Some(dialog) = app.token_dialog.as_mut() {
                dialog.textarea.input(key);
            }
        }
    }
    Ok(())
}

fn submit_token(app: &mut App, token: String) -> Result<()> {
    // 留空 = 断开远端；收藏/理解度/回收站过滤都依赖标注，一并退回全量
    if token.is_empty() {
        app.session.set_token(None)?;
        app.client = None;
        app.favorites.reset();
        app.understandings.reset();
        app.trash.reset();
        app.query.favorite_filter = FavoriteFilterMode::All;
        app.query.levels.clear();
        app.query.trash_filter = TrashFilterMode::All;
        app.pos = 0;
        app.show_explanation = false;
        rebuild_visible(app);
        app.status = Some("已断开 GitHub，远端标注停用".into());
        return Ok(());
    }
    let client = match GistClient::new(token.clone()) {
        Ok(c) => c,
        Err(err) => {
            app.status = Some(format!("GitHub 连接失败: {}", err));
            return Ok(());
        }
    };
    match client.validate_token() {
        Ok(login) => {
            app.session.set_token(Some(token))?;
            app.client = Some(client);
            app.status = Some(format!("已连接 GitHub: {}", login));
            load_annotations(app);
        }
        Err(err) => {
            tracing::warn!(error = %err, "令牌校验失败");
            app.status = Some(format!("令牌校验失败: {}", err));
        }
    }
    Ok(())
}

// ---------------- 管理弹窗 ----------------

fn open_manager(app: &mut App) {
    app.manager = Some(ManagerState {
        rows: Vec::new(),
        list_state: ListState::default(),
        selected: HashSet::new(),
        search: None,
        search_active: false,
        category: None,
        sort: ManageSort::default(),
    });
    refresh_manager_rows(app);
}

fn refresh_manager_rows(app: &mut App) {
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };
    let query = mgr.search.as_deref().unwrap_or("").to_lowercase();
    let rows: Vec<usize> = (0..app.cards.len())
        .filter(|&i| {
            mgr.category
                .as_deref()
                .map_or(true, |c| app.cards[i].category == c)
        })
        .filter(|&i| deck::card_matches_query(&app.cards[i], &query))
        .collect();
    mgr.rows = deck::sort_for_manage(
        &app.cards,
        &rows,
        &mgr.sort,
        app.favorites.items(),
        app.understandings.items(),
    );
    let n = mgr.rows.len();
    match mgr.list_state.selected() {
        Some(sel) if n > 0 => mgr.list_state.select(Some(sel.min(n - 1))),
        _ => mgr.list_state.select(if n > 0 { Some(0) } else { None }),
    }
}

fn handle_manager_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let search_active = app.manager.as_ref().map_or(false, |m| m.search_active);
    if search_active {
        match key.code {
            KeyCode::Esc => {
                if let Some(mgr) = app.manager.as_mut() {
                    mgr.search_active = false;
                    mgr.search = None;
                }
                refresh_manager_rows(app);
            }
            KeyCode::Enter => {
                if let Some(mgr) = app.manager.as_mut() {
                    mgr.search_active = false;
                }
            }
            KeyCode::Backspace => {
                if let Some(mgr) = app.manager.as_mut() {
                    if let Some(s) = mgr.search.as_mut() {
                        s.pop();
                    }
                }
                refresh_manager_rows(app);
            }
            KeyCode::Char(ch) => {
                if let Some(mgr) = app.manager.as_mut() {
                    mgr.search.get_or_insert_with(String::new).push(ch);
                }
                refresh_manager_rows(app);
            }
            _ => {}
        }
        return Ok(());
    }
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => {
            app.manager = None;
        }
        KeyCode::Char('/') => {
            if let Some(mgr) = app.manager.as_mut() {
                mgr.search_active = true;
                mgr.search = Some(String::new());
            }
            refresh_manager_rows(app);
        }
        KeyCode::Down | KeyCode::Char('j') => move_manager_selection(app, 1),
        KeyCode::Up | KeyCode::Char('k') => move_manager_selection(app, -1),
        KeyCode::Char(' ') => manager_toggle_selected(app),
        KeyCode::Char('a') => manager_select_all(app),
        KeyCode::Char('f') => manager_favorite(app, true)?,
        KeyCode::Char('F') => manager_favorite(app, false)?,
        KeyCode::Char('l') => manager_set_level(app, Some(UnderstandingLevel::Low))?,
        KeyCode::Char('m') => manager_set_level(app, Some(UnderstandingLevel::Medium))?,
        KeyCode::Char('h') => manager_set_level(app, Some(UnderstandingLevel::High))?,
        KeyCode::Char('u') => manager_set_level(app, None)?,
        KeyCode::Char('d') => manager_trash(app, true)?,
        KeyCode::Char('r') => manager_trash(app, false)?,
        KeyCode::Char('s') => manager_toggle_sort(app, SortKey::Understanding),
        KeyCode::Char('t') => manager_toggle_sort(app, SortKey::FavoriteTime),
        KeyCode::Char('c') => manager_cycle_category(app),
        KeyCode::Enter => manager_jump(app),
        _ => {}
    }
    Ok(())
}

fn move_manager_selection(app: &mut App, delta: isize) {
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };
    let n = mgr.rows.len();
    if n == 0 {
        mgr.list_state.select(None);
        return;
    }
    let cur = mgr.list_state.selected().unwrap_or(0) as isize;
    let next = (cur + delta).clamp(0, n as isize - 1) as usize;
    mgr.list_state.select(Some(next));
}

fn manager_toggle_selected(app: &mut App) {
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };
    let Some(&idx) = mgr.list_state.selected().and_then(|sel| mgr.rows.get(sel)) else {
        return;
    };
    if !mgr.selected.insert(idx) {
        mgr.selected.remove(&idx);
    }
}

fn manager_select_all(app: &mut App) {
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };
    if mgr.rows.iter().all(|i| mgr.selected.contains(i)) {
        mgr.selected.clear();
    } else {
        mgr.selected.extend(mgr.rows.iter().copied());
    }
}

// 批量操作对象：有多选用多选，没有就用光标所在行
fn manager_targets(app: &App) -> Vec<String> {
    let Some(mgr) = app.manager.as_ref() else {
        return Vec::new();
    };
    if !mgr.selected.is_empty() {
        let mut ids: Vec<String> = mgr
            .selected
            .iter()
            .filter_map(|&i| app.cards.get(i))
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        return ids;
    }
    mgr.list_state
        .selected()
        .and_then(|sel| mgr.rows.get(sel))
        .and_then(|&i| app.cards.get(i))
        .map(|c| vec![c.id.clone()])
        .unwrap_or_default()
}

fn manager_favorite(app: &mut App, add: bool) -> Result<()> {
    let ids = manager_targets(app);
    if ids.is_empty() {
        return Ok(());
    }
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let res = if add {
        // 已收藏的不重写，保住原 addedAt
        let items: Vec<FavoriteItem> = ids
            .iter()
            .filter(|id| !app.favorites.contains(id))
            .map(|id| FavoriteItem::new(id.clone()))
            .collect();
        app.favorites.upsert_many(items, &client, &mut app.session)
    } else {
        app.favorites.remove_many(&ids, &client, &mut app.session)
    };
    if let Err(err) = res {
        tracing::warn!(error = %err, "批量收藏写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    } else {
        app.status = Some(format!(
            "{} 张卡{}",
            ids.len(),
            if add { "加入收藏" } else { "移出收藏" }
        ));
    }
    rebuild_visible(app);
    refresh_manager_rows(app);
    Ok(())
}

fn manager_set_level(app: &mut App, level: Option<UnderstandingLevel>) -> Result<()> {
    let ids = manager_targets(app);
    if ids.is_empty() {
        return Ok(());
    }
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let res = match level {
        Some(level) => {
            let items: Vec<UnderstandingItem> = ids
                .iter()
                .map(|id| UnderstandingItem::new(id.clone(), level))
                .collect();
            app.understandings
                .upsert_many(items, &client, &mut app.session)
        }
        None => app
            .understandings
            .remove_many(&ids, &client, &mut app.session),
    };
    if let Err(err) = res {
        tracing::warn!(error = %err, "批量理解度写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    } else {
        app.status = Some(match level {
            Some(level) => format!("{} 张卡标为 {}", ids.len(), level.as_str()),
            None => format!("{} 张卡清除理解度", ids.len()),
        });
    }
    rebuild_visible(app);
    refresh_manager_rows(app);
    Ok(())
}

fn manager_trash(app: &mut App, into: bool) -> Result<()> {
    let ids = manager_targets(app);
    if ids.is_empty() {
        return Ok(());
    }
    let Some(client) = app.client.clone() else {
        app.status = Some(NO_TOKEN_HINT.into());
        return Ok(());
    };
    let res = if into {
        let items: Vec<TrashItem> = ids
            .iter()
            .filter(|id| !app.trash.contains(id))
            .map(|id| TrashItem::new(id.clone()))
            .collect();
        app.trash.upsert_many(items, &client, &mut app.session)
    } else {
        app.trash.remove_many(&ids, &client, &mut app.session)
    };
    if let Err(err) = res {
        tracing::warn!(error = %err, "批量回收站写入远端失败");
        app.status = Some(format!("远端写入失败: {}", err));
    } else {
        app.status = Some(format!(
            "{} 张卡{}",
            ids.len(),
            if into { "移入回收站" } else { "从回收站恢复" }
        ));
    }
    rebuild_visible(app);
    refresh_manager_rows(app);
    Ok(())
}

fn manager_toggle_sort(app: &mut App, key: SortKey) {
    if let Some(mgr) = app.manager.as_mut() {
        mgr.sort.toggle(key);
    }
    refresh_manager_rows(app);
}

fn manager_cycle_category(app: &mut App) {
    let names: Vec<String> = app.categories.iter().map(|c| c.name.clone()).collect();
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };
    mgr.category = match &mgr.category {
        None => names.first().cloned(),
        Some(cur) => match names.iter().position(|n| n == cur) {
            Some(i) if i + 1 < names.len() => Some(names[i + 1].clone()),
            _ => None,
        },
    };
    mgr.selected.clear();
    refresh_manager_rows(app);
}

// 关闭管理弹窗并把复习位置跳到光标所在卡
fn manager_jump(app: &mut App) {
    let Some(idx) = app.manager.as_ref().and_then(|m| {
        m.list_state
            .selected()
            .and_then(|sel| m.rows.get(sel))
            .copied()
    }) else {
        return;
    };
    app.manager = None;
    match app.visible.iter().position(|&i| i == idx) {
        Some(vis_pos) => {
            app.pos = match app.order {
                OrderMode::Sequential => vis_pos,
                OrderMode::Random => (0..app.visible.len())
                    .find(|&p| app.shuffle.map(p) == Some(vis_pos))
                    .unwrap_or(0),
            };
            app.show_explanation = false;
        }
        None => {
            app.status = Some("该卡不在当前筛选的卡组里".into());
        }
    }
}

// ---------------- 绘制 ----------------

fn ui(f: &mut Frame, app: &mut App) {
    // 顶栏 + 主区 + 底栏
    let v = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(f.area());

    // 主区：左分类栏 + 右卡片
    let h = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
        .split(v[1]);

    draw_header(f, v[0], app);
    draw_sidebar(f, h[0], app);
    draw_card(f, h[1], app);
    draw_footer(f, v[2], app);
    if app.manager.is_some() {
        draw_manager(f, app);
    }
    if app.token_dialog.is_some() {
        draw_token_dialog(f, app);
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let th = app.theme;
    // 背景色条
    let bg = Block::default()
        .borders(Borders::NONE)
        .style(Style::default().bg(th.bar_bg));
    f.render_widget(bg, area);

    let category_label = if app.query.categories.is_empty() {
        "全部".to_string()
    } else {
        format!("{} 选中", app.query.categories.len())
    };
    let mut levels: Vec<UnderstandingLevel> = app.query.levels.iter().copied().collect();
    levels.sort_by_key(|l| l.rank());
    let levels_label = if levels.is_empty() {
        "off".to_string()
    } else {
        levels
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    let week_on = app.query.date_filter == DateFilterMode::Week;
    let trash_on = app.query.trash_filter == TrashFilterMode::Trash;
    let connected = app.client.is_some();

    let mut segs = vec![
        Span::styled(
            " QuizCard · Review ",
            Style::default().fg(th.accent).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" | 分类:", Style::default().fg(th.muted)),
        Span::styled(category_label, Style::default().fg(th.fg)),
        Span::styled(" | 日期:", Style::default().fg(th.muted)),
        Span::styled(
            app.query.date_filter.as_str(),
            Style::default().fg(if week_on { th.good } else { th.fg }),
        ),
        Span::styled(" | 收藏:", Style::default().fg(th.muted)),
        Span::styled(
            app.query.favorite_filter.as_str(),
            Style::default().fg(th.fg),
        ),
        Span::styled(" | 理解:", Style::default().fg(th.muted)),
        Span::styled(levels_label, Style::default().fg(th.fg)),
        Span::styled(" | 视图:", Style::default().fg(th.muted)),
        Span::styled(
            app.query.trash_filter.as_str(),
            Style::default().fg(if trash_on { th.warn } else { th.fg }),
        ),
        Span::styled(" | 顺序:", Style::default().fg(th.muted)),
        Span::styled(app.order.as_str(), Style::default().fg(th.fg)),
        Span::styled(" | 卡组:", Style::default().fg(th.muted)),
        Span::styled(
            format!("{}/{}", app.visible.len(), app.cards.len()),
            Style::default().fg(th.fg),
        ),
        Span::styled(" | GitHub:", Style::default().fg(th.muted)),
        Span::styled(
            if connected { "已连接" } else { "未连接" },
            Style::default().fg(if connected { th.good } else { th.muted }),
        ),
    ];
    if let Some(msg) = &app.status {
        segs.push(Span::styled("  ", Style::default()));
        segs.push(Span::styled(msg.clone(), Style::default().fg(th.warn)));
    }
    let para = Paragraph::new(Line::from(segs)).style(Style::default().bg(th.bar_bg).fg(th.fg));
    f.render_widget(para, area);
}

fn draw_sidebar(f: &mut Frame, area: Rect, app: &mut App) {
    let th = app.theme;
    let items: Vec<ListItem> = app
        .categories
        .iter()
        .map(|c| {
            let checked = app.query.categories.contains(&c.name);
            let mark = if checked { "[x]" } else { "[ ]" };
            let spans = vec![
                Span::styled(
                    format!("{} ", mark),
                    Style::default().fg(if checked { th.good } else { th.muted }),
                ),
                Span::styled(c.name.clone(), Style::default().fg(th.fg)),
                Span::styled(
                    format!(" ({})", c.cards.len()),
                    Style::default().fg(th.muted),
                ),
            ];
            ListItem::new(Line::from(spans))
        })
        .collect();
    let border = if app.focus == Focus::Sidebar {
        th.accent
    } else {
        th.muted
    };
    let list = List::new(items)
        .block(
            Block::default()
                .title(Span::styled(
                    " 分类 (Enter 勾选 / → 只看 / c 清空) ",
                    Style::default().fg(th.accent),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .highlight_style(
            Style::default()
                .bg(th.selection_bg)
                .fg(th.fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    f.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn draw_card(f: &mut Frame, area: Rect, app: &App) {
    let th = app.theme;
    let border = if app.focus == Focus::Card {
        th.accent
    } else {
        th.muted
    };
    let total = app.visible.len();
    let title = format!(
        " 卡片 {}/{} ",
        if total == 0 { 0 } else { app.pos + 1 },
        total
    );
    let block = Block::default()
        .title(Span::styled(title, Style::default().fg(th.accent)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border));

    let Some(card) = app.current_card() else {
        let para = Paragraph::new(Line::from(Span::styled(
            "当前筛选下没有卡片",
            Style::default().fg(th.muted),
        )))
        .block(block)
        .wrap(Wrap { trim: false });
        f.render_widget(para, area);
        return;
    };

    let date_label = match (card.month, card.day) {
        (Some(m), Some(d)) => format!("{}/{}", m, d),
        _ => "无日期".to_string(),
    };
    let mut lines: Vec<Line> = vec![Line::from(vec![
        Span::styled(
            card.category.clone(),
            Style::default().fg(th.info).add_modifier(Modifier::BOLD),
        ),
        Span::styled("  ·  ", Style::default().fg(th.muted)),
        Span::styled(date_label, Style::default().fg(th.muted)),
        Span::styled("  ·  ", Style::default().fg(th.muted)),
        Span::styled(card.id.clone(), Style::default().fg(th.muted)),
    ])];

    let mut badges: Vec<Span> = Vec::new();
    if app.favorites.contains(&card.id) {
        badges.push(Span::styled("★ 收藏  ", Style::default().fg(th.warn)));
    }
    if let Some(u) = app.understandings.get(&card.id) {
        let color = match u.level {
            UnderstandingLevel::High => th.good,
            UnderstandingLevel::Medium => th.info,
            UnderstandingLevel::Low => th.warn,
        };
        badges.push(Span::styled(
            format!("理解度:{}  ", u.level.as_str()),
            Style::default().fg(color),
        ));
    }
    if app.trash.contains(&card.id) {
        badges.push(Span::styled("【回收站】", Style::default().fg(th.warn)));
    }
    if !badges.is_empty() {
        lines.push(Line::from(badges));
    }
    lines.push(Line::from(" "));
    for l in card.content.lines() {
        lines.push(Line::from(Span::raw(l.to_string())));
    }
    if let Some(expl) = &card.explanation {
        lines.push(Line::from(" "));
        lines.push(Line::from(Span::styled(
            "解析:",
            Style::default().add_modifier(Modifier::BOLD).fg(th.info),
        )));
        if app.show_explanation {
            for l in expl.lines() {
                lines.push(Line::from(Span::raw(l.to_string())));
            }
        } else {
            lines.push(Line::from(Span::styled(
                "[···] (Space/Enter 显示)",
                Style::default().fg(th.muted),
            )));
        }
    }
    let para = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(th.fg));
    f.render_widget(para, area);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let th = app.theme;
    let bg = Block::default()
        .borders(Borders::NONE)
        .style(Style::default().bg(th.bar_bg));
    f.render_widget(bg, area);
    let mut tips = String::from(
        " [q]退出  [Tab]焦点  [n/p]切卡  [Home]从头  [Space]解析  [f]收藏  [l/m/h/u]理解度  [d/g]回收/恢复 ",
    );
    tips.push_str("| 过滤: [w]一周 [F]收藏 [L/M/H]理解 [T]回收站 [c]清分类 ");
    tips.push_str("| [o]顺序 [S]重洗  [B]管理  [G]令牌  [Y]同步  [R]重载 ");
    let help = Paragraph::new(Line::from(vec![Span::styled(
        tips,
        Style::default().fg(th.muted),
    )]))
    .style(Style::default().bg(th.bar_bg));
    f.render_widget(help, area);
}

fn draw_manager(f: &mut Frame, app: &mut App) {
    let th = app.theme;
    let area = centered_rect(86, 80, f.area());
    f.render_widget(Clear, area);
    let cards = &app.cards;
    let favorites = &app.favorites;
    let understandings = &app.understandings;
    let trash = &app.trash;
    let Some(mgr) = app.manager.as_mut() else {
        return;
    };

    let block = Block::default()
        .title(Span::styled(
            " 卡片管理  [Esc 关闭 / Space 选中 / a 全选 / Enter 跳转] ",
            Style::default().fg(th.accent),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(th.muted));
    let inner = Rect {
        x: area.x + 1,
        y: area.y + 1,
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    };
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(inner);

    // 状态行
    let sort_label = if mgr.sort.is_empty() {
        "off".to_string()
    } else {
        mgr.sort
            .keys
            .iter()
            .map(|(key, dir)| {
                let name = match key {
                    SortKey::Understanding => "理解度",
                    SortKey::FavoriteTime => "收藏时间",
                };
                format!("{}{}", name, dir.arrow())
            })
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut segs = vec![
        Span::styled("分类:", Style::default().fg(th.muted)),
        Span::styled(
            mgr.category.as_deref().unwrap_or("全部").to_string(),
            Style::default().fg(th.fg),
        ),
        Span::styled("  排序:", Style::default().fg(th.muted)),
        Span::styled(sort_label, Style::default().fg(th.fg)),
        Span::styled("  选中:", Style::default().fg(th.muted)),
        Span::styled(
            format!("{}", mgr.selected.len()),
            Style::default().fg(th.fg),
        ),
        Span::styled(
            format!("  共 {} 张", mgr.rows.len()),
            Style::default().fg(th.muted),
        ),
    ];
    if mgr.search_active || mgr.search.is_some() {
        let q = mgr.search.as_deref().unwrap_or("");
        segs.push(Span::styled("  /", Style::default().fg(th.muted)));
        segs.push(Span::styled(q.to_string(), Style::default().fg(th.fg)));
        if mgr.search_active {
            segs.push(Span::styled("_", Style::default().fg(th.accent)));
        }
    }
    f.render_widget(Paragraph::new(Line::from(segs)), chunks[0]);

    // 卡片行
    let items: Vec<ListItem> = mgr
        .rows
        .iter()
        .map(|&i| {
            let card = &cards[i];
            let mark = if mgr.selected.contains(&i) {
                "[x] "
            } else {
                "[ ] "
            };
            let head = truncate_width(card.content.lines().next().unwrap_or(""), 48);
            let mut spans = vec![
                Span::styled(mark, Style::default().fg(th.good)),
                Span::styled(
                    format!("{} ", truncate_width(&card.category, 10)),
                    Style::default().fg(th.info),
                ),
                Span::styled(head, Style::default().fg(th.fg)),
            ];
            if let Some(fav) = favorites.get(&card.id) {
                // 收藏时间只留日期部分，完整时间戳太占列宽
                let day = fav.added_at.get(..10).unwrap_or(&fav.added_at);
                spans.push(Span::styled(
                    format!("  ★{}", day),
                    Style::default().fg(th.warn),
                ));
            }
            if let Some(u) = understandings.get(&card.id) {
                spans.push(Span::styled(
                    format!("  {}", u.level.as_str()),
                    Style::default().fg(th.muted),
                ));
            }
            if trash.contains(&card.id) {
                spans.push(Span::styled("  回收站", Style::default().fg(th.warn)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();
    let list = List::new(items)
        .highlight_style(
            Style::default()
                .bg(th.selection_bg)
                .fg(th.fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    f.render_stateful_widget(list, chunks[1], &mut mgr.list_state);

    let hint = Paragraph::new(Line::from(vec![Span::styled(
        " [f/F]收藏  [l/m/h/u]理解度  [d/r]回收/恢复  [s/t]排序  [c]分类  [/]搜索 ",
        Style::default().fg(th.muted),
    )]));
    f.render_widget(hint, chunks[2]);
}

fn draw_token_dialog(f: &mut Frame, app: &App) {
    let th = app.theme;
    let Some(dialog) = app.token_dialog.as_ref() else {
        return;
    };
    let area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, area);
    let block = Block::default()
        .title(Span::styled(
            " GitHub 令牌  [Enter 确认 / Esc 取消 / 留空断开] ",
            Style::default().fg(th.accent),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(th.muted));
    let inner = Rect {
        x: area.x + 1,
        y: area.y + 1,
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    };
    f.render_widget(block, area);
    f.render_widget(&dialog.textarea, inner);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vert = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    let horiz = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vert[1]);
    horiz[1]
}

// 按显示宽度截断，中日韩全角按 2 列算
fn truncate_width(s: &str, maxw: usize) -> String {
    let mut out = String::new();
    let mut w = 0usize;
    for ch in s.chars() {
        let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
        if w + cw > maxw {
            out.push('…');
            break;
        }
        out.push(ch);
        w += cw;
    }
    out
}

// ---------------- Keymap ----------------
#[derive(Deserialize)]
struct KeyMapToml {
    keys: HashMap<String, String>,
}

fn load_keymap() -> Result<HashMap<char, KeyAction>> {
    // 探测 keymap.toml：当前目录及向上
    let mut paths = vec![PathBuf::from("keymap.toml")];
    if let Ok(cwd) = std::env::current_dir() {
        for anc in cwd.ancestors() {
            paths.push(anc.join("quizcard-tui/keymap.toml"));
        }
    }
    for p in paths {
        if p.exists() {
            let content = fs::read_to_string(&p)
                .with_context(|| format!("读取 keymap 失败: {}", p.display()))?;
            let km: KeyMapToml = toml::from_str(&content).context("解析 keymap.toml 失败")?;
            return Ok(parse_keymap(km.keys));
        }
    }
    Err(anyhow::anyhow!("未找到 keymap.toml"))
}

fn parse_keymap(map: HashMap<String, String>) -> HashMap<char, KeyAction> {
    let mut out = HashMap::new();
    for (k, v) in map {
        if let Some(ch) = k.chars().next() {
            if k.chars().count() == 1 {
                if let Some(act) = action_from_str(&v) {
                    out.insert(ch, act);
                }
            }
        }
    }
    if out.is_empty() {
        out = default_keymap();
    }
    out
}

fn action_from_str(s: &str) -> Option<KeyAction> {
    use KeyAction::*;
    Some(match s {
        "next_card" => NextCard,
        "prev_card" => PrevCard,
        "toggle_explanation" => ToggleExplanation,
        "toggle_favorite" => ToggleFavorite,
        "set_level_low" => SetLevelLow,
        "set_level_medium" => SetLevelMedium,
        "set_level_high" => SetLevelHigh,
        "clear_level" => ClearLevel,
        "trash_card" => TrashCard,
        "restore_card" => RestoreCard,
        "cycle_favorite_filter" => CycleFavoriteFilter,
        "toggle_week_filter" => ToggleWeekFilter,
        "toggle_trash_view" => ToggleTrashView,
        "filter_level_low" => FilterLevelLow,
        "filter_level_medium" => FilterLevelMedium,
        "filter_level_high" => FilterLevelHigh,
        "clear_category_selection" => ClearCategorySelection,
        "toggle_order" => ToggleOrder,
        "reshuffle" => Reshuffle,
        "open_manager" => OpenManager,
        "open_token_dialog" => OpenTokenDialog,
        "reload" => Reload,
        "sync_annotations" => SyncAnnotations,
        _ => return None,
    })
}

fn default_keymap() -> HashMap<char, KeyAction> {
    use KeyAction::*;
    let mut m = HashMap::new();
    m.insert('n', NextCard);
    m.insert('p', PrevCard);
    m.insert('e', ToggleExplanation);
    m.insert('f', ToggleFavorite);
    m.insert('l', SetLevelLow);
    m.insert('m', SetLevelMedium);
    m.insert('h', SetLevelHigh);
    m.insert('u', ClearLevel);
    m.insert('d', TrashCard);
    m.insert('g', RestoreCard);
    m.insert('F', CycleFavoriteFilter);
    m.insert('w', ToggleWeekFilter);
    m.insert('T', ToggleTrashView);
    m.insert('L', FilterLevelLow);
    m.insert('M', FilterLevelMedium);
    m.insert('H', FilterLevelHigh);
    m.insert('c', ClearCategorySelection);
    m.insert('o', ToggleOrder);
    m.insert('S', Reshuffle);
    m.insert('B', OpenManager);
    m.insert('G', OpenTokenDialog);
    m.insert('R', Reload);
    m.insert('Y', SyncAnnotations);
    m
}

// ---------------- 主题与样式 ----------------
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ThemeKind {
    Dark,
    Light,
}

#[derive(Debug, Clone, Copy)]
struct Theme {
    fg: Color,
    muted: Color,
    accent: Color,
    bar_bg: Color,
    selection_bg: Color,
    good: Color,
    warn: Color,
    info: Color,
}

fn theme_of(kind: ThemeKind) -> Theme {
    match kind {
        ThemeKind::Dark => Theme {
            fg: Color::Rgb(220, 220, 220),
            muted: Color::Rgb(140, 140, 140),
            accent: Color::Rgb(95, 175, 255),
            bar_bg: Color::Rgb(35, 40, 46),
            selection_bg: Color::Rgb(60, 65, 72),
            good: Color::Rgb(130, 200, 120),
            warn: Color::Rgb(255, 200, 110),
            info: Color::Rgb(120, 170, 255),
        },
        ThemeKind::Light => Theme {
            fg: Color::Rgb(30, 30, 30),
            muted: Color::Rgb(120, 120, 120),
            accent: Color::Rgb(0, 122, 255),
            bar_bg: Color::Rgb(235, 240, 245),
            selection_bg: Color::Rgb(210, 220, 235),
            good: Color::Rgb(38, 166, 91),
            warn: Color::Rgb(255, 160, 0),
            info: Color::Rgb(0, 122, 255),
        },
    }
}

// ---------------- 日志与路径 ----------------

// 日志只走文件，终端被 TUI 占着
fn init_logging(cli: &Cli) {
    let path = cli
        .log_file
        .clone()
        .or_else(|| std::env::var("QUIZCARD_LOG").ok().map(PathBuf::from));
    let Some(path) = path else {
        return;
    };
    let file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("打开日志文件失败: {}: {}", path.display(), err);
            return;
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quizcard_tui=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .try_init();
}

fn default_content_dir(cli: &Cli) -> PathBuf {
    if let Some(p) = &cli.content {
        return p.clone();
    }
    if let Ok(envp) = std::env::var("QUIZCARD_CONTENT") {
        return PathBuf::from(envp);
    }

    // 自动探测：从当前目录向上找内容清单
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        for anc in cwd.ancestors() {
            candidates.push(anc.join("content"));
            candidates.push(anc.join("public/content"));
        }
    }
    for c in candidates {
        if c.join("index.json").exists() {
            return c;
        }
    }
    // 最后返回默认路径（不存在时装载阶段会告警并给出空卡组）
    PathBuf::from("content")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_cover_every_key_action() {
        let table = [
            ("next_card", KeyAction::NextCard),
            ("prev_card", KeyAction::PrevCard),
            ("toggle_explanation", KeyAction::ToggleExplanation),
            ("toggle_favorite", KeyAction::ToggleFavorite),
            ("set_level_low", KeyAction::SetLevelLow),
            ("set_level_medium", KeyAction::SetLevelMedium),
            ("set_level_high", KeyAction::SetLevelHigh),
            ("clear_level", KeyAction::ClearLevel),
            ("trash_card", KeyAction::TrashCard),
            ("restore_card", KeyAction::RestoreCard),
            ("cycle_favorite_filter", KeyAction::CycleFavoriteFilter),
            ("toggle_week_filter", KeyAction::ToggleWeekFilter),
            ("toggle_trash_view", KeyAction::ToggleTrashView),
            ("filter_level_low", KeyAction::FilterLevelLow),
            ("filter_level_medium", KeyAction::FilterLevelMedium),
            ("filter_level_high", KeyAction::FilterLevelHigh),
            (
                "clear_category_selection",
                KeyAction::ClearCategorySelection,
            ),
            ("toggle_order", KeyAction::ToggleOrder),
            ("reshuffle", KeyAction::Reshuffle),
            ("open_manager", KeyAction::OpenManager),
            ("open_token_dialog", KeyAction::OpenTokenDialog),
            ("reload", KeyAction::Reload),
            ("sync_annotations", KeyAction::SyncAnnotations),
        ];
        for (name, expect) in table {
            assert_eq!(action_from_str(name), Some(expect), "name: {}", name);
        }
        assert_eq!(action_from_str("not_an_action"), None);
    }

    #[test]
    fn default_keymap_binds_every_action_once() {
        let m = default_keymap();
        assert_eq!(m.len(), 23);
        let actions: HashSet<KeyAction> = m.values().copied().collect();
        assert_eq!(actions.len(), 23);
    }

    #[test]
    fn parse_keymap_skips_bad_entries_and_falls_back() {
        let mut raw = HashMap::new();
        raw.insert("nn".to_string(), "next_card".to_string()); // 多字符键忽略
        raw.insert("x".to_string(), "not_an_action".to_string()); // 未知动作忽略
        let parsed = parse_keymap(raw);
        // 全部条目无效时退回默认键位
        assert_eq!(parsed.get(&'n'), Some(&KeyAction::NextCard));

        let mut raw = HashMap::new();
        raw.insert("z".to_string(), "toggle_favorite".to_string());
        let parsed = parse_keymap(raw);
        assert_eq!(parsed.get(&'z'), Some(&KeyAction::ToggleFavorite));
        assert_eq!(parsed.get(&'n'), None);
    }

    #[test]
    fn truncate_width_counts_display_columns() {
        assert_eq!(truncate_width("hello", 10), "hello");
        assert_eq!(truncate_width("hello", 4), "hell…");
        // 全角每字两列
        assert_eq!(truncate_width("宪法基本", 8), "宪法基本");
        assert_eq!(truncate_width("宪法基本", 5), "宪法…");
        assert_eq!(truncate_width("", 4), "");
    }
}
