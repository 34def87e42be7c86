//! Watch-page bootstrap.
//!
//! The watch page embeds a JSON blob in `#embedded-data[data-props]`; this
//! module fetches the page, extracts and unescapes the blob, and maps it to
//! the [`NicolivePageData`] record everything else is built from.

use ndgr_protocol::{EmbeddedData, LiveId, LoginUser, NicolivePageData};
use tracing::debug;

use crate::error::ClientError;

const WATCH_PAGE_BASE: &str = "https://live.nicovideo.jp/watch";

/// Parse a live id (`lv…`, `ch…`, `user/…`) out of an id string or a full
/// watch URL.
pub fn parse_live_id(input: &str) -> Result<LiveId, ClientError> {
    input.parse().map_err(|_| ClientError::LiveIdParse {
        input: input.to_owned(),
    })
}

/// Fetch and parse the watch page for `live_id`.
pub async fn fetch_page_data(
    client: &reqwest::Client,
    live_id: &LiveId,
) -> Result<NicolivePageData, ClientError> {
    let url = format!("{WATCH_PAGE_BASE}/{live_id}");
    debug!(url = %url, "fetching watch page");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::PageNotFound {
            live_id: live_id.to_string(),
            status: status.as_u16(),
        });
    }
    let html = response
        .text()
        .await
        .map_err(|e| ClientError::Network(e.to_string()))?;
    parse_page_data(live_id, &html)
}

/// Parse an already-fetched watch page.
pub fn parse_page_data(live_id: &LiveId, html: &str) -> Result<NicolivePageData, ClientError> {
    let props = extract_embedded_props(html).ok_or_else(|| {
        ClientError::PageParse("no embedded-data props in watch page".to_owned())
    })?;
    let data: EmbeddedData =
        serde_json::from_str(&props).map_err(|e| ClientError::PageParse(e.to_string()))?;

    if data.site.relive.web_socket_url.is_empty() {
        return Err(ClientError::AccessDenied {
            live_id: live_id.to_string(),
        });
    }

    let login_user = data.user.map(|user| LoginUser {
        id: user.id.and_then(|id| match id {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        nickname: user.nickname,
        is_broadcaster: user.is_broadcaster,
        is_operator: user.is_operator,
    });

    Ok(NicolivePageData {
        websocket_url: data.site.relive.web_socket_url,
        live_id: data.program.nicolive_program_id,
        title: data.program.title,
        begin_time: data.program.begin_time,
        end_time: data.program.end_time,
        status: data.program.status,
        provider_type: data.program.provider_type,
        supplier_name: data.program.supplier.and_then(|s| s.name),
        login_user,
        broadcaster_comment_token: data.site.relive.csrf_token,
    })
}

/// Locate the `data-props` attribute of the `embedded-data` element and
/// return its entity-unescaped value.
fn extract_embedded_props(html: &str) -> Option<String> {
    let anchor = html.find("id=\"embedded-data\"")?;
    let tail = &html[anchor..];
    let start = tail.find("data-props=\"")? + "data-props=\"".len();
    let value = &tail[start..];
    let end = value.find('"')?;
    Some(unescape_html(&value[..end]))
}

fn unescape_html(s: &str) -> String {
    // &amp; last so freshly produced ampersands are not re-expanded.
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
