#![deny(unsafe_code)]

use std::env;

#[tokio::main]
async fn main() {
    let status = dtail_cli::dtail::run(env::args_os()).await;
    std::process::exit(i32::from(status.rank()));
}
