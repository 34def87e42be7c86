//! Broadcaster-comment REST wrappers.
//!
//! Thin request shims over the `broadcaster_comment` endpoint; not part of
//! the connection engine, but exposed alongside it because the token comes
//! from the same bootstrap record.

use ndgr_protocol::{CommentColor, LiveId};

use crate::error::ClientError;

const API_BASE: &str = "https://live2.nicovideo.jp/unama/api/v3/programs";

#[derive(Debug, Clone, Default)]
pub struct BroadcasterComment {
    pub text: String,
    pub name: Option<String>,
    pub is_permanent: bool,
    pub color: Option<CommentColor>,
}

fn comment_url(live_id: &LiveId) -> String {
    format!("{API_BASE}/{live_id}/broadcaster_comment")
}

fn comment_form(comment: &BroadcasterComment) -> Vec<(&'static str, String)> {
    let mut form = vec![("text", comment.text.clone())];
    if let Some(name) = &comment.name {
        form.push(("name", name.clone()));
    }
    form.push(("isPermanent", comment.is_permanent.to_string()));
    if let Some(color) = &comment.color {
        form.push(("command", color.as_str().to_owned()));
    }
    form
}

/// Put (create or replace) the pinned broadcaster comment.
pub async fn put_broadcaster_comment(
    client: &reqwest::Client,
    live_id: &LiveId,
    token: &str,
    comment: &BroadcasterComment,
) -> Result<(), ClientError> {
    let url = comment_url(live_id);
    let response = client
        .put(&url)
        .header("x-public-api-token", token)
        .form(&comment_form(comment))
        .send()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::fetch(&url, format_args!("HTTP {status}")))
    }
}

/// Delete the pinned broadcaster comment.
pub async fn delete_broadcaster_comment(
    client: &reqwest::Client,
    live_id: &LiveId,
    token: &str,
) -> Result<(), ClientError> {
    let url = comment_url(live_id);
    let response = client
        .delete(&url)
        .header("x-public-api-token", token)
        .send()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::fetch(&url, format_args!("HTTP {status}")))
    }
}
