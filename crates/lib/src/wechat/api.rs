//! Official-account platform API client: access token, permanent image upload, draft creation.
//!
//! Used by the CLI for credential checks and draft publishing. The webhook gateway never
//! calls it.

use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_API_BASE: &str = "https://api.weixin.qq.com";
const DEFAULT_AUTHOR: &str = "wxoa";
const DIGEST_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("wechat request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("wechat api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("wechat api returned no {0}")]
    MissingField(&'static str),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Common reply shape: either the requested fields or `errcode`/`errmsg`.
#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    media_id: Option<String>,
}

impl ApiReply {
    fn into_result(self) -> Result<Self, ApiError> {
        if self.errcode != 0 {
            return Err(ApiError::Api {
                code: self.errcode,
                message: self.errmsg,
            });
        }
        Ok(self)
    }
}

/// One article in a draft.
#[derive(Debug, Clone, Serialize)]
pub struct DraftArticle {
    pub title: String,
    pub author: String,
    pub digest: String,
    pub content: String,
    pub content_source_url: String,
    pub thumb_media_id: String,
    pub show_cover_pic: u8,
    pub need_open_comment: u8,
    pub only_fans_can_comment: u8,
}

impl DraftArticle {
    /// Article with the platform defaults; digest is the first 50 characters of the content.
    pub fn new(title: &str, content: &str, author: Option<&str>, thumb_media_id: &str) -> Self {
        Self {
            title: title.to_string(),
            author: author.unwrap_or(DEFAULT_AUTHOR).to_string(),
            digest: digest_of(content),
            content: content.to_string(),
            content_source_url: String::new(),
            thumb_media_id: thumb_media_id.to_string(),
            show_cover_pic: 1,
            need_open_comment: 0,
            only_fans_can_comment: 0,
        }
    }
}

#[derive(Serialize)]
struct DraftBody<'a> {
    articles: [&'a DraftArticle; 1],
}

/// What to publish: title, body, cover image file, optional author.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub title: String,
    pub content: String,
    pub cover: std::path::PathBuf,
    pub author: Option<String>,
}

fn digest_of(content: &str) -> String {
    if content.chars().count() > DIGEST_CHARS {
        let head: String = content.chars().take(DIGEST_CHARS).collect();
        format!("{}...", head)
    } else {
        content.to_string()
    }
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Resolve API base URL: env WXOA_API_BASE overrides the public endpoint.
pub fn api_base() -> String {
    std::env::var("WXOA_API_BASE")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

#[derive(Clone)]
pub struct WeChatClient {
    base_url: String,
    client: reqwest::Client,
}

impl Default for WeChatClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WeChatClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(api_base);
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    /// GET /cgi-bin/token: exchange app id and secret for an access token.
    pub async fn access_token(&self, app_id: &str, app_secret: &str) -> Result<String, ApiError> {
        let url = format!("{}/cgi-bin/token", self.base_url);
        let reply: ApiReply = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", app_id),
                ("secret", app_secret),
            ])
            .send()
            .await?
            .json()
            .await?;
        reply
            .into_result()?
            .access_token
            .ok_or(ApiError::MissingField("access_token"))
    }

    /// Credentials are valid when the platform issues an access token for them.
    pub async fn verify_credentials(&self, app_id: &str, app_secret: &str) -> Result<(), ApiError> {
        self.access_token(app_id, app_secret).await.map(|_| ())
    }

    /// POST /cgi-bin/material/add_material?type=image: upload a permanent image, returns media id.
    pub async fn upload_image(&self, access_token: &str, path: &Path) -> Result<String, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cover.png")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(image_mime(path))?;
        let form = reqwest::multipart::Form::new().part("media", part);
        let url = format!("{}/cgi-bin/material/add_material", self.base_url);
        let reply: ApiReply = self
            .client
            .post(&url)
            .query(&[("access_token", access_token), ("type", "image")])
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        let media_id = reply
            .into_result()?
            .media_id
            .ok_or(ApiError::MissingField("media_id"))?;
        log::info!("uploaded image {} as media {}", path.display(), media_id);
        Ok(media_id)
    }

    /// POST /cgi-bin/draft/add: create a draft with one article, returns the draft media id.
    pub async fn add_draft(&self, access_token: &str, article: &DraftArticle) -> Result<String, ApiError> {
        let url = format!("{}/cgi-bin/draft/add", self.base_url);
        let reply: ApiReply = self
            .client
            .post(&url)
            .query(&[("access_token", access_token)])
            .json(&DraftBody { articles: [article] })
            .send()
            .await?
            .json()
            .await?;
        reply
            .into_result()?
            .media_id
            .ok_or(ApiError::MissingField("media_id"))
    }

    /// Full publish flow: access token, cover upload, draft creation.
    pub async fn publish_draft(
        &self,
        app_id: &str,
        app_secret: &str,
        request: &DraftRequest,
    ) -> Result<String, ApiError> {
        let token = self.access_token(app_id, app_secret).await?;
        log::debug!("access token acquired for {}", app_id);
        let thumb = self.upload_image(&token, &request.cover).await?;
        let article = DraftArticle::new(
            &request.title,
            &request.content,
            request.author.as_deref(),
            &thumb,
        );
        let draft = self.add_draft(&token, &article).await?;
        log::info!("draft {} created for {}", draft, app_id);
        Ok(draft)
    }
}
