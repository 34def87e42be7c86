// ndgr-test-utils: Mock servers and wire builders for testing the
// connection engine.
//
// `MockWatchServer` speaks the watch-channel WebSocket protocol under test
// control; `MockMessageServer` serves staged size-delimited protobuf bodies
// over HTTP. Each test spins up its own isolated instances on random ports.

pub mod builders;
pub mod mock_message_server;
pub mod mock_watch_server;

pub use mock_message_server::MockMessageServer;
pub use mock_watch_server::{MockWatchConn, MockWatchServer};
