use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::{Value, json};

/// Settings that point the provider at an API key variable nobody sets, so
/// every provider call fails fast without touching the network.
fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(
        data_dir.join("grantforge.toml"),
        r#"
[provider]
api_key_env = "GRANTFORGE_TEST_UNSET_KEY_VARIABLE"

[provider.retry]
max_retries = 0
"#,
    )?;
    Ok(())
}

async fn call(
    client: &rmcp::service::RunningService<rmcp::RoleClient, ()>,
    name: &'static str,
    args: Value,
) -> Result<Value, Box<dyn std::error::Error>> {
    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new(name).with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;
    Ok(result.structured_content.expect("structured content"))
}

#[tokio::test]
async fn mcp_stdio_job_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = grantforge_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("GRANTFORGE_DATA_DIR", tempdir.path())
                .env_remove("GRANTFORGE_CONFIG")
                .env("GRANTFORGE_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let report = call(
        &client,
        "grantforge_validate",
        json!({
            "section": "Need Statement",
            "draft": "We leverage synergy to help underserved youth."
        }),
    )
    .await?;
    assert!(report["score"].as_f64().unwrap() < 85.0);
    assert!(
        report["violations"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v["rule_id"] == "terminology:underserved")
    );

    let submitted = call(
        &client,
        "grantforge_submit",
        json!({
            "section": "Need Statement",
            "requirement": "Youth entrepreneurship in public housing"
        }),
    )
    .await?;
    let job_id = submitted["jobId"].as_str().expect("job id").to_string();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let job = loop {
        let job = call(
            &client,
            "grantforge_poll",
            json!({ "jobId": job_id, "keep": true }),
        )
        .await?;
        if job["outcome"].is_object() {
            break job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never finished");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(job["state"], "failed");
    assert_eq!(job["outcome"]["cause"], "embedding-unavailable");
    assert_eq!(job["attempts"].as_array().map(Vec::len), Some(0));

    let cancelled = call(&client, "grantforge_cancel", json!({ "jobId": job_id })).await?;
    assert_eq!(cancelled["state"], "failed");

    client.cancel().await?;
    Ok(())
}

fn grantforge_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_grantforge") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("grantforge");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
