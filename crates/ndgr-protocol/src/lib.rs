// ndgr-protocol: Watch-channel message types and serialization.
//
// All watch-channel frames are JSON text with a top-level `type` field for
// discriminated (de)serialization and an optional `data` payload. The enum
// variants map 1:1 to the frame types the comment server speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Message-channel coordinates handed out once per watch connection.
///
/// `view_uri` is the entry endpoint; `vpos_base_time` is the zero point of
/// program-relative time (`vpos`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageServerData {
    pub view_uri: String,
    pub vpos_base_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashed_user_id: Option<String>,
}

/// Program schedule; re-sent by the server whenever the broadcaster extends
/// or ends the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleData {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Requested stream descriptor inside `startWatching` / `changeStream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub quality: StreamQuality,
    /// Quality cap applied when the account does not permit `quality`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<StreamQuality>,
    pub latency: StreamLatency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chase_play: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamQuality {
    Abr,
    SuperHigh,
    High,
    Normal,
    Low,
    SuperLow,
    AudioOnly,
    AudioHigh,
    BroadcasterHigh,
    BroadcasterLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamLatency {
    Low,
    High,
}

/// Server-announced reasons for a terminal `disconnect` frame.
///
/// Only `END_PROGRAM` is a normal termination; every other reason is
/// errorful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    Takeover,
    NoPermission,
    EndProgram,
    PingTimeout,
    TooManyConnections,
    TooManyWatchings,
    Crowded,
    MaintenanceIn,
    ServiceTemporarilyUnavailable,
}

impl DisconnectReason {
    pub fn is_normal(self) -> bool {
        self == DisconnectReason::EndProgram
    }
}

// ---------------------------------------------------------------------------
// Comment decoration
// ---------------------------------------------------------------------------

/// Comment color: a fixed named palette (the `*2` names are the premium
/// variants) or a custom `#RRGGBB` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentColor {
    White,
    Red,
    Pink,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
    Black,
    White2,
    Red2,
    Pink2,
    Orange2,
    Yellow2,
    Green2,
    Cyan2,
    Blue2,
    Purple2,
    Black2,
    /// Custom premium color, `#RRGGBB`.
    Hex(String),
}

impl CommentColor {
    pub fn as_str(&self) -> &str {
        match self {
            CommentColor::White => "white",
            CommentColor::Red => "red",
            CommentColor::Pink => "pink",
            CommentColor::Orange => "orange",
            CommentColor::Yellow => "yellow",
            CommentColor::Green => "green",
            CommentColor::Cyan => "cyan",
            CommentColor::Blue => "blue",
            CommentColor::Purple => "purple",
            CommentColor::Black => "black",
            CommentColor::White2 => "white2",
            CommentColor::Red2 => "red2",
            CommentColor::Pink2 => "pink2",
            CommentColor::Orange2 => "orange2",
            CommentColor::Yellow2 => "yellow2",
            CommentColor::Green2 => "green2",
            CommentColor::Cyan2 => "cyan2",
            CommentColor::Blue2 => "blue2",
            CommentColor::Purple2 => "purple2",
            CommentColor::Black2 => "black2",
            CommentColor::Hex(hex) => hex,
        }
    }
}

impl std::str::FromStr for CommentColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let color = match s {
            "white" => CommentColor::White,
            "red" => CommentColor::Red,
            "pink" => CommentColor::Pink,
            "orange" => CommentColor::Orange,
            "yellow" => CommentColor::Yellow,
            "green" => CommentColor::Green,
            "cyan" => CommentColor::Cyan,
            "blue" => CommentColor::Blue,
            "purple" => CommentColor::Purple,
            "black" => CommentColor::Black,
            "white2" => CommentColor::White2,
            "red2" => CommentColor::Red2,
            "pink2" => CommentColor::Pink2,
            "orange2" => CommentColor::Orange2,
            "yellow2" => CommentColor::Yellow2,
            "green2" => CommentColor::Green2,
            "cyan2" => CommentColor::Cyan2,
            "blue2" => CommentColor::Blue2,
            "purple2" => CommentColor::Purple2,
            "black2" => CommentColor::Black2,
            hex if hex.len() == 7
                && hex.starts_with('#')
                && hex[1..].bytes().all(|b| b.is_ascii_hexdigit()) =>
            {
                CommentColor::Hex(hex.to_owned())
            }
            other => return Err(format!("unknown comment color: '{other}'")),
        };
        Ok(color)
    }
}

impl Serialize for CommentColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommentColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentSize {
    Big,
    Medium,
    Small,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentPosition {
    Ue,
    Naka,
    Shita,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentFont {
    Defont,
    Mincho,
    Gothic,
}

// ---------------------------------------------------------------------------
// Client -> Server frames
// ---------------------------------------------------------------------------

/// `startWatching`: first frame after the socket opens; negotiates the
/// viewing session. `reconnect: true` tells the server this is a resumed
/// session after migration or a network failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchingData {
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentData {
    pub text: String,
    /// Program-relative time in centiseconds since `vpos_base_time`.
    pub vpos: i64,
    pub is_anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<CommentColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<CommentSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CommentPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<CommentFont>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAkashicData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chase_play: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEnqueteData {
    /// Index of the chosen answer, 0..=8.
    pub answer: u8,
}

/// All client-to-server watch-channel frames.
///
/// Serializes using the `type` field as the tag and `data` as the payload:
///
/// ```json
/// { "type": "postComment", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "camelCase")]
pub enum NicoliveWsSendMessage {
    StartWatching(StartWatchingData),
    KeepSeat,
    Pong,
    PostComment(PostCommentData),
    GetAkashic(GetAkashicData),
    ChangeStream(StreamRequest),
    AnswerEnquete(AnswerEnqueteData),
    GetTaxonomy,
    GetStreamQualities,
}

// ---------------------------------------------------------------------------
// Server -> Client frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatData {
    /// Advisory keep-alive interval. Keep-alive is piggybacked on `ping`
    /// replies rather than driven by a client timer, so this is
    /// informational only.
    pub keep_interval_sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AkashicData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamData {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default)]
    pub available_qualities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeData {
    pub current_ms: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewers: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gift_points: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectData {
    pub reason: DisconnectReason,
}

/// Server-initiated migration: reopen the socket with the new audience
/// token after waiting `wait_time_sec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectData {
    pub audience_token: String,
    pub wait_time_sec: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCommentResultData {
    pub chat: PostedComment,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueteData {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueteResultData {
    #[serde(default)]
    pub items: Vec<f64>,
}

/// All server-to-client watch-channel frames.
///
/// Low-traffic informational frames keep their payload as raw JSON; the
/// frames the engine acts on are fully typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "camelCase")]
pub enum NicoliveWsReceiveMessage {
    MessageServer(MessageServerData),
    Seat(SeatData),
    Akashic(AkashicData),
    Stream(StreamData),
    ServerTime(ServerTimeData),
    Statistics(StatisticsData),
    Schedule(ScheduleData),
    Ping,
    Disconnect(DisconnectData),
    Reconnect(ReconnectData),
    PostCommentResult(PostCommentResultData),
    TagUpdated(serde_json::Value),
    Taxonomy(serde_json::Value),
    StreamQualities(serde_json::Value),
    Enquete(EnqueteData),
    #[serde(rename = "enqueteresult")]
    EnqueteResult(EnqueteResultData),
    Moderator(serde_json::Value),
    RemoveModerator(serde_json::Value),
}

// ---------------------------------------------------------------------------
// Program identifiers
// ---------------------------------------------------------------------------

/// A program identifier: `lv<digits>`, `ch<digits>`, or `user/<digits>`.
///
/// Parsing scans the input for the first identifier occurrence, so full
/// watch-page URLs are accepted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveId {
    Lv(u64),
    Ch(u64),
    User(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIdParseError {
    pub input: String,
}

impl std::fmt::Display for LiveIdParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no live id (lv/ch/user) found in '{input}'",
            input = self.input
        )
    }
}

impl std::error::Error for LiveIdParseError {}

impl std::fmt::Display for LiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveId::Lv(n) => write!(f, "lv{n}"),
            LiveId::Ch(n) => write!(f, "ch{n}"),
            LiveId::User(n) => write!(f, "user/{n}"),
        }
    }
}

/// Find the first `<prefix><digits>` occurrence in `s` and parse the digits.
fn scan_id(s: &str, prefix: &str) -> Option<u64> {
    for (idx, _) in s.match_indices(prefix) {
        let rest = &s[idx + prefix.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            if let Ok(n) = digits.parse() {
                return Some(n);
            }
        }
    }
    None
}

impl std::str::FromStr for LiveId {
    type Err = LiveIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = scan_id(s, "user/") {
            return Ok(LiveId::User(n));
        }
        if let Some(n) = scan_id(s, "lv") {
            return Ok(LiveId::Lv(n));
        }
        if let Some(n) = scan_id(s, "ch") {
            return Ok(LiveId::Ch(n));
        }
        Err(LiveIdParseError {
            input: s.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Bootstrap page data
// ---------------------------------------------------------------------------

/// Program release status as reported by the watch page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramLiveStatus {
    Released,
    BeforeRelease,
    OnAir,
    Ended,
}

/// The `data-props` JSON blob embedded in the watch page, reduced to the
/// fields the engine reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedData {
    pub site: EmbeddedSite,
    pub program: EmbeddedProgram,
    #[serde(default)]
    pub social_group: Option<EmbeddedSocialGroup>,
    #[serde(default)]
    pub user: Option<EmbeddedUser>,
    #[serde(default)]
    pub creator_creator_support_summary: Option<EmbeddedSupportSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedSite {
    pub relive: EmbeddedRelive,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedRelive {
    #[serde(default)]
    pub web_socket_url: String,
    #[serde(default)]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedProgram {
    pub nicolive_program_id: String,
    pub title: String,
    /// UNIX seconds.
    pub begin_time: i64,
    /// UNIX seconds.
    pub end_time: i64,
    pub status: ProgramLiveStatus,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub supplier: Option<EmbeddedSupplier>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedSupplier {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub program_provider_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedSocialGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedUser {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub is_broadcaster: bool,
    #[serde(default)]
    pub is_operator: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedSupportSummary {
    #[serde(default)]
    pub is_supportable: bool,
}

/// The logged-in viewer, when the watch page was fetched with credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUser {
    pub id: Option<String>,
    pub nickname: Option<String>,
    pub is_broadcaster: bool,
    pub is_operator: bool,
}

/// Bootstrap record assembled from the watch page; everything the engine
/// needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NicolivePageData {
    pub websocket_url: String,
    pub live_id: String,
    pub title: String,
    /// UNIX seconds.
    pub begin_time: i64,
    /// UNIX seconds.
    pub end_time: i64,
    pub status: ProgramLiveStatus,
    pub provider_type: Option<String>,
    pub supplier_name: Option<String>,
    pub login_user: Option<LoginUser>,
    /// Token for the broadcaster-comment REST endpoint.
    pub broadcaster_comment_token: Option<String>,
}
