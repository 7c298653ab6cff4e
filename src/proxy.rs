//! Media delivery for `/media/{video_id}`.
//!
//! Platforms whose media URLs are bound to the requesting client are relayed
//! byte for byte; the rest get a redirect. The relayed body is a stream over
//! the upstream response, so nothing is buffered and dropping the body closes
//! the upstream connection.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Method, header},
    response::Response,
};
use tracing::debug;

use crate::error::Result;
use crate::models::Video;

/// Request headers passed upstream so ranged and conditional requests work.
const FORWARDED_REQUEST_HEADERS: [HeaderName; 5] = [
    header::RANGE,
    header::IF_RANGE,
    header::IF_NONE_MATCH,
    header::IF_MODIFIED_SINCE,
    header::USER_AGENT,
];

/// Connection-scoped headers that must not be relayed.
const HOP_BY_HOP_HEADERS: [HeaderName; 7] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
];

pub enum MediaResponse {
    /// Send the client to the upstream URL directly.
    Redirect(String),
    /// Upstream response relayed with its status and headers.
    Proxied(Response),
    /// No media URL has been resolved for the video yet.
    Pending,
}

#[derive(Clone)]
pub struct MediaProxy {
    client: reqwest::Client,
}

impl MediaProxy {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub async fn resolve(
        &self,
        video: &Video,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<MediaResponse> {
        let Some(media_url) = video.media_url.as_deref() else {
            return Ok(MediaResponse::Pending);
        };
        if !video.handler.use_proxy() {
            return Ok(MediaResponse::Redirect(media_url.to_string()));
        }
        let response = self.relay(media_url, method, headers).await?;
        Ok(MediaResponse::Proxied(response))
    }

    async fn relay(&self, url: &str, method: &Method, headers: &HeaderMap) -> Result<Response> {
        let upstream_method = if method == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };
        let mut request = self.client.request(upstream_method.clone(), url);
        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = headers.get(&name) {
                request = request.header(name, value.clone());
            }
        }

        let upstream = request.send().await?;
        let status = upstream.status();
        debug!(%status, method = %upstream_method, "relaying media");

        let mut relayed_headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                relayed_headers.append(name.clone(), value.clone());
            }
        }

        let body = if upstream_method == Method::HEAD {
            Body::empty()
        } else {
            Body::from_stream(upstream.bytes_stream())
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = relayed_headers;
        Ok(response)
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(name) || name.as_str() == "keep-alive"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::Handler;
    use axum::{Router, body::to_bytes, http::StatusCode, routing::get};
    use chrono::Utc;

    fn video(handler: Handler, media_url: Option<String>) -> Video {
        let now = Utc::now();
        Video {
            id: "vid00001".into(),
            source_id: "src".into(),
            handler,
            uploader: None,
            uploader_id: None,
            title: None,
            description: None,
            duration: None,
            thumbnail: None,
            url: "https://www.youtube.com/watch?v=abc".into(),
            media_url,
            feed_media_url: "http://feeds.test/media/vid00001".into(),
            media_filesize: None,
            released_at: None,
            added_at: now,
            updated_at: now,
        }
    }

    /// Local upstream that answers ranged requests with a fixed payload.
    async fn spawn_upstream() -> String {
        async fn media(headers: HeaderMap) -> Response {
            let mut response = if let Some(range) = headers.get(header::RANGE) {
                let mut response = Response::new(Body::from("partial"));
                *response.status_mut() = StatusCode::PARTIAL_CONTENT;
                response
                    .headers_mut()
                    .insert("x-seen-range", range.clone());
                response
            } else {
                Response::new(Body::from("full media payload"))
            };
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, "video/mp4".parse().unwrap());
            response
        }

        let app = Router::new().route("/media.mp4", get(media));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/media.mp4")
    }

    #[tokio::test]
    async fn pending_without_media_url() {
        let proxy = MediaProxy::new().unwrap();
        let outcome = proxy
            .resolve(&video(Handler::Youtube, None), &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert!(matches!(outcome, MediaResponse::Pending));
    }

    #[tokio::test]
    async fn redirects_when_handler_does_not_proxy() {
        let proxy = MediaProxy::new().unwrap();
        let outcome = proxy
            .resolve(
                &video(Handler::Rumble, Some("https://cdn.rumble.cloud/a.mp4".into())),
                &Method::GET,
                &HeaderMap::new(),
            )
            .await
            .unwrap();
        match outcome {
            MediaResponse::Redirect(url) => assert_eq!(url, "https://cdn.rumble.cloud/a.mp4"),
            _ => panic!("expected redirect"),
        }
    }

    #[tokio::test]
    async fn relays_upstream_bytes_and_headers() {
        let upstream = spawn_upstream().await;
        let proxy = MediaProxy::new().unwrap();
        let outcome = proxy
            .resolve(
                &video(Handler::Youtube, Some(upstream)),
                &Method::GET,
                &HeaderMap::new(),
            )
            .await
            .unwrap();
        let MediaResponse::Proxied(response) = outcome else {
            panic!("expected proxied response");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"full media payload");
    }

    #[tokio::test]
    async fn forwards_range_requests() {
        let upstream = spawn_upstream().await;
        let proxy = MediaProxy::new().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, "bytes=0-6".parse().unwrap());
        headers.insert(header::COOKIE, "session=secret".parse().unwrap());
        let MediaResponse::Proxied(response) = proxy
            .resolve(&video(Handler::Youtube, Some(upstream)), &Method::GET, &headers)
            .await
            .unwrap()
        else {
            panic!("expected proxied response");
        };
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["x-seen-range"], "bytes=0-6");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"partial");
    }

    #[tokio::test]
    async fn head_requests_have_no_body() {
        let upstream = spawn_upstream().await;
        let proxy = MediaProxy::new().unwrap();
        let MediaResponse::Proxied(response) = proxy
            .resolve(
                &video(Handler::Youtube, Some(upstream)),
                &Method::HEAD,
                &HeaderMap::new(),
            )
            .await
            .unwrap()
        else {
            panic!("expected proxied response");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn hop_by_hop_headers_are_filtered() {
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
        assert!(!is_hop_by_hop(&header::CONTENT_RANGE));
    }
}
