//! `termlink check <command...>`: run a command line through the
//! sanitizer locally and report what would be sent.

use anyhow::{Context, Result};
use termlink_client::SecurityConfig;
use termlink_guard::CommandSanitizer;

pub fn run(security: &SecurityConfig, command: &str, json: bool) -> Result<()> {
    let sanitizer = CommandSanitizer::with_config(security.sanitizer_config())
        .context("invalid security configuration")?;

    let result = sanitizer.sanitize(command);
    let score = sanitizer.safety_score(command);

    if json {
        let entry = sanitizer
            .audit_log()
            .pop()
            .context("sanitizer recorded no audit entry")?;
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!("level:  {}", sanitizer.level());
        println!("input:  {command}");
        match &result {
            Ok(sanitized) if sanitized == command => println!("result: allowed"),
            Ok(sanitized) => {
                println!("result: rewritten");
                println!("output: {sanitized}");
            }
            Err(_) => println!("result: blocked"),
        }
        println!("score:  {score}/100");
    }

    result.map(|_| ()).context("command blocked")
}
