// GitHub Gist 客户端：标注文档的远端存取
// 文档定位 = 列表接口上 描述 与 文件名 双重匹配；新建走私有 gist
// 这里只管线上协议，本地缓存和迁移在 store 里

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum GistError {
    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GitHub API 返回 {status}: {message}")]
    Api { status: u16, message: String },
    #[error("JSON 编码/解码失败: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GistError>;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct GithubUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct GistSummary {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub files: HashMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
pub struct GistFile {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
struct GistFilePayload<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateGistPayload<'a> {
    description: &'a str,
    public: bool,
    files: HashMap<&'a str, GistFilePayload<'a>>,
}

#[derive(Debug, Serialize)]
struct UpdateGistPayload<'a> {
    files: HashMap<&'a str, GistFilePayload<'a>>,
}

// reqwest 的 blocking::Client 内部就是 Arc，Clone 很廉价
#[derive(Debug, Clone)]
pub struct GistClient {
    http: reqwest::blocking::Client,
    token: String,
}

impl GistClient {
    pub fn new(token: String) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent("quizcard-tui")
            .build()?;
        Ok(Self { http, token })
    }

    fn auth(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        req.header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
    }

    // 非 2xx 统一转成 Api 错误，尽量带上服务端的 message
    fn check(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .json::<ApiErrorBody>()
            .map(|b| b.message)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("未知错误")
                    .to_string()
            });
        Err(GistError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// 校验令牌，返回账号 login
    pub fn validate_token(&self) -> Result<String> {
        let resp = self.auth(self.http.get(format!("{}/user", API_BASE))).send()?;
        let user: GithubUser = Self::check(resp)?.json()?;
        tracing::info!(login = %user.login, "GitHub 令牌校验通过");
        Ok(user.login)
    }

    /// 在自己的 gist 列表里找标注文档，描述和文件名都得对上
    pub fn find_document(&self, filename: &str, description: &str) -> Result<Option<String>> {
        let resp = self
            .auth(self.http.get(format!("{}/gists", API_BASE)))
            .send()?;
        let gists: Vec<GistSummary> = Self::check(resp)?.json()?;
        let found = gists.into_iter().find(|g| {
            g.description.as_deref() == Some(description) && g.files.contains_key(filename)
        });
        match &found {
            Some(g) => tracing::debug!(gist_id = %g.id, filename, "找到标注文档"),
            None => tracing::debug!(filename, "远端没有标注文档"),
        }
        Ok(found.map(|g| g.id))
    }

    /// 新建私有 gist，返回 id
    pub fn create_document(
        &self,
        filename: &str,
        description: &str,
        content: &str,
    ) -> Result<String> {
        let mut files = HashMap::new();
        files.insert(filename, GistFilePayload { content });
        let payload = CreateGistPayload {
            description,
            public: false,
            files,
        };
        let resp = self
            .auth(self.http.post(format!("{}/gists", API_BASE)))
            .json(&payload)
            .send()?;
        let created: GistSummary = Self::check(resp)?.json()?;
        tracing::info!(gist_id = %created.id, filename, "新建标注文档");
        Ok(created.id)
    }

    pub fn update_document(&self, gist_id: &str, filename: &str, content: &str) -> Result<()> {
        let mut files = HashMap::new();
        files.insert(filename, GistFilePayload { content });
        let payload = UpdateGistPayload { files };
        let resp = self
            .auth(self.http.patch(format!("{}/gists/{}", API_BASE, gist_id)))
            .json(&payload)
            .send()?;
        Self::check(resp)?;
        tracing::debug!(gist_id, filename, "更新标注文档");
        Ok(())
    }

    /// 拉取 gist 里指定文件的内容；文件不存在返回 None
    pub fn fetch_document(&self, gist_id: &str, filename: &str) -> Result<Option<String>> {
        let resp = self
            .auth(self.http.get(format!("{}/gists/{}", API_BASE, gist_id)))
            .send()?;
        let mut gist: GistSummary = Self::check(resp)?.json()?;
        Ok(gist.files.remove(filename).and_then(|f| f.content))
    }
}
