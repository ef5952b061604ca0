//! X (Twitter) API v2 provider
//!
//! Bearer-token HTTP client. Status codes map onto `ProviderError`:
//! 429 -> RateLimited (with `x-rate-limit-reset`), 401/403 -> AuthFailed,
//! 404 -> NotFound, transport failures -> Network.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::traits::{ProviderError, SocialProvider, TimelineWindow};
use crate::models::{Author, EngagementMetrics, InboundItem, ItemKind, OutboundItem};

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/2";
const TWEET_FIELDS: &str = "created_at,author_id,conversation_id,in_reply_to_user_id,referenced_tweets,public_metrics";
const PAGE_SIZE: usize = 100;
const MAX_MENTION_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
struct TweetPage {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    r#type: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    quote_count: u64,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: User,
}

#[derive(Debug, Serialize)]
struct CreateTweet<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplySettings<'a>>,
}

#[derive(Debug, Serialize)]
struct ReplySettings<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    data: CreatedTweetData,
}

#[derive(Debug, Deserialize)]
struct CreatedTweetData {
    id: String,
    text: String,
}

impl Tweet {
    fn reply_target(&self) -> Option<String> {
        self.referenced_tweets
            .iter()
            .find(|r| r.r#type == "replied_to")
            .map(|r| r.id.clone())
    }

    fn is_retweet(&self) -> bool {
        self.referenced_tweets.iter().any(|r| r.r#type == "retweeted")
    }
}

/// X API v2 client
#[derive(Clone)]
pub struct XProvider {
    client: Client,
    base_url: String,
    bearer_token: String,
    user_id: String,
    handle: String,
}

impl XProvider {
    pub fn new(base_url: &str, bearer_token: &str, user_id: &str, handle: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
            user_id: user_id.to_string(),
            handle: handle.trim_start_matches('@').to_string(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Other(format!("Malformed response: {}", e)));
        }

        let retry_after = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map(|reset| (reset - Utc::now().timestamp()).max(0) as u64);
        let body = response.text().await.unwrap_or_default();

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(retry_after),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::AuthFailed(format!("{}: {}", status, body))
            }
            StatusCode::NOT_FOUND => ProviderError::NotFound(body),
            s if s.is_server_error() => ProviderError::Network(format!("{}: {}", s, body)),
            s => ProviderError::Other(format!("{}: {}", s, body)),
        })
    }

    async fn resolve_user_id(&self, handle: &str) -> Result<String, ProviderError> {
        let handle = handle.trim_start_matches('@');
        if handle.eq_ignore_ascii_case(&self.handle) && !self.user_id.is_empty() {
            return Ok(self.user_id.clone());
        }

        let url = format!("{}/users/by/username/{}", self.base_url, handle);
        let lookup: UserLookup = self.send(self.client.get(&url)).await?;
        Ok(lookup.data.id)
    }
}

fn usernames(includes: &Option<Includes>) -> HashMap<String, String> {
    includes
        .as_ref()
        .map(|i| i.users.iter().map(|u| (u.id.clone(), u.username.clone())).collect())
        .unwrap_or_default()
}

fn mentions_from_page(page: TweetPage) -> Vec<InboundItem> {
    let names = usernames(&page.includes);
    page.data
        .into_iter()
        .map(|t| {
            let author_id = t.author_id.clone().unwrap_or_default();
            let handle = names.get(&author_id).cloned().unwrap_or_else(|| author_id.clone());
            let in_reply_to = t.reply_target();
            InboundItem {
                kind: if in_reply_to.is_some() { ItemKind::Reply } else { ItemKind::Mention },
                id: t.id,
                content: t.text,
                author: Author { id: author_id, handle },
                in_reply_to,
                created_at: t.created_at.unwrap_or_else(Utc::now),
                learning_processed: false,
                learning_processed_at: None,
            }
        })
        .collect()
}

#[async_trait]
impl SocialProvider for XProvider {
    fn name(&self) -> &str {
        "x"
    }

    fn own_handle(&self) -> &str {
        &self.handle
    }

    async fn fetch_mentions(&self, since_cursor: Option<&str>) -> Result<Vec<InboundItem>, ProviderError> {
        let url = format!("{}/users/{}/mentions", self.base_url, self.user_id);
        let mut mentions = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("max_results", PAGE_SIZE.to_string()),
                ("tweet.fields", TWEET_FIELDS.to_string()),
                ("expansions", "author_id".to_string()),
                ("user.fields", "username".to_string()),
            ];
            if let Some(cursor) = since_cursor {
                query.push(("since_id", cursor.to_string()));
            }
            if let Some(token) = &next_token {
                query.push(("pagination_token", token.clone()));
            }

            let page: TweetPage = self.send(self.client.get(&url).query(&query)).await?;
            pages += 1;
            next_token = page.meta.as_ref().and_then(|m| m.next_token.clone());
            mentions.extend(mentions_from_page(page));

            // Without a cursor only the newest page is taken
            if next_token.is_none() || since_cursor.is_none() {
                break;
            }
            if pages >= MAX_MENTION_PAGES {
                warn!("Stopped after {} mention pages, older mentions since {:?} skipped", pages, since_cursor);
                break;
            }
        }

        // API returns newest first
        mentions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        debug!("Fetched {} mentions in {} pages since {:?}", mentions.len(), pages, since_cursor);
        Ok(mentions)
    }

    async fn fetch_timeline(&self, handle: &str, window: &TimelineWindow) -> Result<Vec<OutboundItem>, ProviderError> {
        let user_id = self.resolve_user_id(handle).await?;
        let url = format!("{}/users/{}/tweets", self.base_url, user_id);
        let author = Author::new(&user_id, handle.trim_start_matches('@'));
        let exclude = if window.include_replies { "retweets" } else { "retweets,replies" };

        let mut posts = Vec::new();
        let mut next_token: Option<String> = None;

        while posts.len() < window.max_items {
            let mut query: Vec<(&str, String)> = vec![
                ("max_results", PAGE_SIZE.to_string()),
                ("tweet.fields", TWEET_FIELDS.to_string()),
                ("exclude", exclude.to_string()),
                ("start_time", window.since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ];
            if let Some(token) = &next_token {
                query.push(("pagination_token", token.clone()));
            }

            let page: TweetPage = self.send(self.client.get(&url).query(&query)).await?;
            for tweet in page.data {
                if tweet.is_retweet() {
                    continue;
                }
                let in_reply_to = tweet.reply_target();
                posts.push(OutboundItem {
                    kind: if in_reply_to.is_some() { ItemKind::Reply } else { ItemKind::Post },
                    id: tweet.id,
                    content: tweet.text,
                    author: author.clone(),
                    in_reply_to,
                    created_at: tweet.created_at.unwrap_or_else(Utc::now),
                    metrics: tweet.public_metrics.map(|m| EngagementMetrics {
                        likes: m.like_count,
                        replies: m.reply_count,
                        reposts: m.retweet_count,
                        quotes: m.quote_count,
                    }),
                    learning_processed: false,
                    learning_processed_at: None,
                });
            }

            next_token = page.meta.and_then(|m| m.next_token);
            if next_token.is_none() {
                break;
            }
        }

        posts.truncate(window.max_items);
        debug!("Fetched {} timeline posts for @{}", posts.len(), author.handle);
        Ok(posts)
    }

    async fn post(&self, content: &str, in_reply_to: Option<&str>) -> Result<OutboundItem, ProviderError> {
        let url = format!("{}/tweets", self.base_url);
        let body = CreateTweet {
            text: content,
            reply: in_reply_to.map(|id| ReplySettings { in_reply_to_tweet_id: id }),
        };

        let created: CreatedTweet = self.send(self.client.post(&url).json(&body)).await?;
        info!("Posted tweet {}", created.data.id);

        Ok(OutboundItem {
            id: created.data.id,
            kind: if in_reply_to.is_some() { ItemKind::Reply } else { ItemKind::Post },
            content: created.data.text,
            author: Author::new(&self.user_id, &self.handle),
            in_reply_to: in_reply_to.map(|s| s.to_string()),
            created_at: Utc::now(),
            metrics: None,
            learning_processed: false,
            learning_processed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mentions_page() {
        let raw = r#"{
            "data": [
                {"id": "2", "text": "@persona wagmi", "author_id": "77",
                 "created_at": "2024-05-01T10:00:00.000Z",
                 "referenced_tweets": [{"type": "replied_to", "id": "1"}]}
            ],
            "includes": {"users": [{"id": "77", "username": "fan"}]},
            "meta": {"result_count": 1}
        }"#;

        let page: TweetPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].reply_target().as_deref(), Some("1"));
        assert_eq!(usernames(&page.includes).get("77").map(String::as_str), Some("fan"));
    }

    #[test]
    fn test_empty_page_has_no_data() {
        let page: TweetPage = serde_json::from_str(r#"{"meta": {"result_count": 0}}"#).unwrap();
        assert!(page.data.is_empty());
        assert!(page.meta.unwrap().next_token.is_none());
    }

    #[test]
    fn test_create_tweet_body() {
        let body = CreateTweet {
            text: "gm",
            reply: Some(ReplySettings { in_reply_to_tweet_id: "5" }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["reply"]["in_reply_to_tweet_id"], "5");

        let plain = CreateTweet { text: "gm", reply: None };
        assert!(serde_json::to_value(&plain).unwrap().get("reply").is_none());
    }

    /// Serves canned JSON bodies in order, one connection per request, and
    /// hands back the request lines it saw
    async fn serve(bodies: Vec<&'static str>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                seen.push(text.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            seen
        });
        (base, task)
    }

    #[tokio::test]
    async fn test_fetch_mentions_follows_pages() {
        let newest = r#"{
            "data": [
                {"id": "105", "text": "@persona five", "author_id": "7", "created_at": "2024-05-01T10:05:00.000Z"},
                {"id": "104", "text": "@persona four", "author_id": "7", "created_at": "2024-05-01T10:04:00.000Z"}
            ],
            "includes": {"users": [{"id": "7", "username": "fan"}]},
            "meta": {"result_count": 2, "next_token": "page2"}
        }"#;
        let older = r#"{
            "data": [
                {"id": "103", "text": "@persona three", "author_id": "8", "created_at": "2024-05-01T10:03:00.000Z"}
            ],
            "includes": {"users": [{"id": "8", "username": "other"}]},
            "meta": {"result_count": 1}
        }"#;

        let (base, server) = serve(vec![newest, older]).await;
        let provider = XProvider::new(&base, "token", "42", "persona");
        let mentions = provider.fetch_mentions(Some("100")).await.unwrap();

        let ids: Vec<&str> = mentions.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["103", "104", "105"]);
        assert_eq!(mentions[0].author.handle, "other");

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.contains("since_id=100")));
        assert!(!requests[0].contains("pagination_token"));
        assert!(requests[1].contains("pagination_token=page2"));
    }
}
