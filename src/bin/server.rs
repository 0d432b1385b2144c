//! Chat gateway server binary.
//! Run with: cargo run --bin chat-gateway-server

use std::process::ExitCode;

use chat_gateway::start_chat_gateway;

fn main() -> ExitCode {
    start_chat_gateway::run()
}
