pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

/// Print a command error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        println!(
            "{}",
            serde_json::json!({"success": false, "error": err.to_string(), "causes": chain})
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
