use async_trait::async_trait;
use reqwest::Client;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::instrument;

pub const API_BASE: &str = "https://www.googleapis.com/blogger/v3";
/// Title given to posts created by the bot; later posts edit the first match.
pub const DRAFT_TITLE: &str = "Draft Post";

#[derive(Debug, Error)]
pub enum BloggerError {
  #[error(transparent)]
  Http(#[from] reqwest::Error),
  #[error("Blogger API returned {status}: {body}")]
  Api { status: u16, body: String },
}

/// A blog post. Fields the bot does not touch ride along in `extra` so an
/// update sends the resource back intact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostPage {
  #[serde(default)]
  items: Vec<Post>,
  next_page_token: Option<String>,
}

#[async_trait]
pub trait PostStore: Send + Sync {
  /// Live and draft posts of the blog.
  async fn list_posts(&self, blog_id: &str) -> Result<Vec<Post>, BloggerError>;
  async fn get_post(&self, blog_id: &str, post_id: &str) -> Result<Post, BloggerError>;
  async fn update_post(&self, blog_id: &str, post: &Post) -> Result<Post, BloggerError>;
  /// Creates a draft.
  async fn insert_post(&self, blog_id: &str, title: &str, content: &str) -> Result<Post, BloggerError>;
}

pub struct BloggerClient {
  http: Client,
  base_url: String,
  access_token: String,
}

impl BloggerClient {
  pub fn new(http: Client, access_token: impl Into<String>) -> Self {
    Self::with_base_url(http, API_BASE, access_token)
  }

  pub fn with_base_url(http: Client, base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
    Self {
      http,
      base_url: base_url.into(),
      access_token: access_token.into(),
    }
  }

  fn posts_url(&self, blog_id: &str) -> String {
    format!("{}/blogs/{blog_id}/posts", self.base_url.trim_end_matches('/'))
  }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BloggerError> {
  let response = request.send().await?;
  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(BloggerError::Api {
      status: status.as_u16(),
      body,
    });
  }
  Ok(response.json().await?)
}

#[async_trait]
impl PostStore for BloggerClient {
  #[instrument(skip(self))]
  async fn list_posts(&self, blog_id: &str) -> Result<Vec<Post>, BloggerError> {
    let mut posts = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
      let mut request = self
        .http
        .get(self.posts_url(blog_id))
        .bearer_auth(&self.access_token)
        .query(&[
          ("status", "live"),
          ("status", "draft"),
          ("view", "ADMIN"),
          ("fetchBodies", "false"),
          ("maxResults", "50"),
        ]);
      if let Some(token) = &page_token {
        request = request.query(&[("pageToken", token.as_str())]);
      }
      let page: PostPage = send_json(request).await?;
      posts.extend(page.items);
      match page.next_page_token {
        Some(token) => page_token = Some(token),
        None => break,
      }
    }
    debug!(count = posts.len(), "listed posts");
    Ok(posts)
  }

  #[instrument(skip(self))]
  async fn get_post(&self, blog_id: &str, post_id: &str) -> Result<Post, BloggerError> {
    let request = self
      .http
      .get(format!("{}/{post_id}", self.posts_url(blog_id)))
      .bearer_auth(&self.access_token)
      .query(&[("view", "ADMIN")]);
    send_json(request).await
  }

  #[instrument(skip(self, post), fields(post_id = %post.id))]
  async fn update_post(&self, blog_id: &str, post: &Post) -> Result<Post, BloggerError> {
    let request = self
      .http
      .put(format!("{}/{}", self.posts_url(blog_id), post.id))
      .bearer_auth(&self.access_token)
      .json(post);
    send_json(request).await
  }

  #[instrument(skip(self, content))]
  async fn insert_post(&self, blog_id: &str, title: &str, content: &str) -> Result<Post, BloggerError> {
    let request = self
      .http
      .post(self.posts_url(blog_id))
      .bearer_auth(&self.access_token)
      .query(&[("isDraft", "true")])
      .json(&json!({ "title": title, "content": content }));
    send_json(request).await
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Published {
  Updated(Post),
  Created(Post),
}

impl Published {
  pub fn message(&self) -> String {
    match self {
      Published::Updated(post) => format!("Post updated: {}", link(post)),
      Published::Created(post) => format!("New post created: {}", link(post)),
    }
  }
}

fn link(post: &Post) -> String {
  post
    .url
    .clone()
    .unwrap_or_else(|| format!("draft {}", post.id))
}

/// Replaces the content of the first post titled [`DRAFT_TITLE`], or creates
/// a new draft with that title when none exists.
pub async fn publish(store: &dyn PostStore, blog_id: &str, content: &str) -> Result<Published, BloggerError> {
  let posts = store.list_posts(blog_id).await?;
  if let Some(existing) = posts.iter().find(|post| post.title == DRAFT_TITLE) {
    let mut post = store.get_post(blog_id, &existing.id).await?;
    post.content = Some(content.to_string());
    let updated = store.update_post(blog_id, &post).await?;
    info!(post_id = %updated.id, "updated post");
    return Ok(Published::Updated(updated));
  }
  let created = store.insert_post(blog_id, DRAFT_TITLE, content).await?;
  info!(post_id = %created.id, "created draft post");
  Ok(Published::Created(created))
}
