//! Minimal CouchDB document client shared by the document-database backends.

use crate::error::{BlockerError, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Attempts at an upsert before a revision conflict is reported.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Connection settings for a CouchDB database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouchSettings {
    /// Server base URL, e.g. `http://localhost:5984`
    pub url: String,
    /// Database name; created on connect when missing
    pub database: String,
    /// Basic-auth user
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password
    #[serde(default)]
    pub password: Option<String>,
}

/// Revision-aware JSON document access for one database.
#[derive(Debug, Clone)]
pub struct CouchClient {
    http: reqwest::Client,
    db_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl CouchClient {
    /// Connect and make sure the database exists.
    pub async fn connect(settings: &CouchSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("Blocker")
            .build()
            .map_err(BlockerError::backend)?;
        let client = Self {
            http,
            db_url: format!(
                "{}/{}",
                settings.url.trim_end_matches('/'),
                settings.database
            ),
            username: settings.username.clone(),
            password: settings.password.clone(),
        };
        client.ensure_database().await?;
        Ok(client)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, url);
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}", self.db_url, id)
    }

    async fn ensure_database(&self) -> Result<()> {
        let resp = self
            .request(Method::PUT, &self.db_url)
            .send()
            .await
            .map_err(BlockerError::backend)?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::PRECONDITION_FAILED => {
                debug!(db = %self.db_url, "couch database ready");
                Ok(())
            }
            s => Err(BlockerError::Backend(format!(
                "creating database {} returned {s}",
                self.db_url
            ))),
        }
    }

    /// Current revision of `id`, or `None` when absent.
    pub async fn head_rev(&self, id: &str) -> Result<Option<String>> {
        let resp = self
            .request(Method::HEAD, &self.doc_url(id))
            .send()
            .await
            .map_err(BlockerError::backend)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(resp
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string())),
            s => Err(BlockerError::Backend(format!("HEAD {id} returned {s}"))),
        }
    }

    /// Fetch and decode `id`, or `None` when absent.
    pub async fn get_doc<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let resp = self
            .request(Method::GET, &self.doc_url(id))
            .send()
            .await
            .map_err(BlockerError::backend)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = resp.bytes().await.map_err(BlockerError::backend)?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
            s => Err(BlockerError::Backend(format!("GET {id} returned {s}"))),
        }
    }

    /// Create or overwrite `id` with `doc`.
    pub async fn put_doc<T: Serialize + ?Sized>(&self, id: &str, doc: &T) -> Result<()> {
        let mut body = serde_json::to_value(doc)?;
        for _ in 0..MAX_CONFLICT_RETRIES {
            if let Some(obj) = body.as_object_mut() {
                match self.head_rev(id).await? {
                    Some(rev) => obj.insert("_rev".into(), rev.into()),
                    None => obj.remove("_rev"),
                };
            }
            let resp = self
                .request(Method::PUT, &self.doc_url(id))
                .json(&body)
                .send()
                .await
                .map_err(BlockerError::backend)?;
            match resp.status() {
                s if s.is_success() => return Ok(()),
                StatusCode::CONFLICT => continue,
                s => return Err(BlockerError::Backend(format!("PUT {id} returned {s}"))),
            }
        }
        Err(BlockerError::Backend(format!(
            "PUT {id} kept conflicting after {MAX_CONFLICT_RETRIES} attempts"
        )))
    }

    /// Delete `id`. Returns `false` when it did not exist.
    pub async fn delete_doc(&self, id: &str) -> Result<bool> {
        let Some(rev) = self.head_rev(id).await? else {
            return Ok(false);
        };
        let resp = self
            .request(Method::DELETE, &self.doc_url(id))
            .query(&[("rev", rev.as_str())])
            .send()
            .await
            .map_err(BlockerError::backend)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(BlockerError::Backend(format!("DELETE {id} returned {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    async fn connected(server: &mut Server) -> CouchClient {
        server
            .mock("PUT", "/blocker")
            .with_status(412)
            .create_async()
            .await;
        CouchClient::connect(&CouchSettings {
            url: server.url(),
            database: "blocker".into(),
            username: None,
            password: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn existing_database_is_accepted() {
        let mut server = Server::new_async().await;
        let _client = connected(&mut server).await;
    }

    #[tokio::test]
    async fn overwrite_sends_current_revision() {
        let mut server = Server::new_async().await;
        let client = connected(&mut server).await;
        server
            .mock("HEAD", "/blocker/doc1")
            .with_status(200)
            .with_header("etag", "\"3-abc\"")
            .create_async()
            .await;
        let put = server
            .mock("PUT", "/blocker/doc1")
            .match_body(Matcher::PartialJson(json!({ "_rev": "3-abc", "v": 1 })))
            .with_status(201)
            .create_async()
            .await;
        client.put_doc("doc1", &json!({ "v": 1 })).await.unwrap();
        put.assert_async().await;
    }

    #[tokio::test]
    async fn absent_documents() {
        let mut server = Server::new_async().await;
        let client = connected(&mut server).await;
        server
            .mock("GET", "/blocker/nope")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("HEAD", "/blocker/nope")
            .with_status(404)
            .create_async()
            .await;
        let got: Option<serde_json::Value> = client.get_doc("nope").await.unwrap();
        assert!(got.is_none());
        assert!(!client.delete_doc("nope").await.unwrap());
    }

    #[tokio::test]
    async fn delete_passes_revision() {
        let mut server = Server::new_async().await;
        let client = connected(&mut server).await;
        server
            .mock("HEAD", "/blocker/doc2")
            .with_status(200)
            .with_header("etag", "\"1-xyz\"")
            .create_async()
            .await;
        let del = server
            .mock("DELETE", "/blocker/doc2")
            .match_query(Matcher::UrlEncoded("rev".into(), "1-xyz".into()))
            .with_status(200)
            .create_async()
            .await;
        assert!(client.delete_doc("doc2").await.unwrap());
        del.assert_async().await;
    }
}
