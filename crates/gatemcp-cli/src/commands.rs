//! Subcommand implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use gatemcp_auth::{Credential, CredentialProvider, InMemoryCredentialProvider};
use gatemcp_client::{ConnectOptions, ConnectionOrchestrator, fetch_token};
use gatemcp_protocol::types::{CallToolResult, Content};
use gatemcp_server::{GateServer, ServerConfig};

use crate::cli::{CheckArgs, ServeArgs, TokenArgs};

/// Client id registered when none is given.
const DEFAULT_CLIENT_ID: &str = "gatemcp-cli";

/// Load the configuration, apply overrides and serve until interrupted.
///
/// # Errors
///
/// Invalid configuration, or a listener that cannot be bound.
pub async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    // Validated only once overrides are in place
    let config = apply_overrides(config, &args);
    config.validate().context("invalid configuration")?;

    info!(
        bind = %config.bind_address,
        bindings = ?config.bindings,
        "Starting gatemcp server"
    );
    let server = GateServer::new(config).context("failed to build server")?;
    server.run().await.context("server terminated with an error")
}

fn apply_overrides(mut config: ServerConfig, args: &ServeArgs) -> ServerConfig {
    if let Some(bind) = &args.bind {
        config = config.with_bind_address(bind.clone());
    }
    if let Some(bindings) = &args.bindings {
        let mut unique = Vec::with_capacity(bindings.len());
        for kind in bindings {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        config = config.with_bindings(unique);
    }
    config
}

/// Fetch a token and print it as JSON.
///
/// # Errors
///
/// Bad URL, unreachable endpoint, or an unusable token response.
pub async fn token(args: TokenArgs) -> anyhow::Result<()> {
    let url = Url::parse(&args.url).with_context(|| format!("invalid token URL {:?}", args.url))?;
    let provider =
        InMemoryCredentialProvider::new(args.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID));
    let http = reqwest::Client::new();

    let credential = fetch_token(&http, &url, args.client_id.as_deref(), &provider)
        .await
        .context("token request failed")?;
    println!("{}", serde_json::to_string_pretty(&credential)?);
    Ok(())
}

/// Connect, list tools, optionally call one, then clean up.
///
/// # Errors
///
/// Any failure while authenticating, negotiating or calling; the connection
/// is cleaned up either way.
pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let base = Url::parse(&args.url).with_context(|| format!("invalid server URL {:?}", args.url))?;
    let http = reqwest::Client::new();

    let provider = Arc::new(InMemoryCredentialProvider::new(
        args.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID),
    ));
    match &args.token {
        Some(token) => provider.save_tokens(Credential::bearer(token.clone())),
        None => {
            let token_url = base.join("/token")?;
            fetch_token(&http, &token_url, args.client_id.as_deref(), provider.as_ref())
                .await
                .with_context(|| format!("failed to obtain a token from {token_url}"))?;
        }
    }

    let options = ConnectOptions::new()
        .with_policy(args.transport)
        .with_timeout(Duration::from_secs(args.timeout));
    let client = ConnectionOrchestrator::new(base.as_str(), provider)?
        .with_options(options)
        .with_http_client(http);

    let outcome = run_check(&client, args.call.as_deref(), arguments).await;
    if let Err(e) = client.cleanup().await {
        warn!(error = %e, "Cleanup failed");
    }
    outcome
}

async fn run_check(
    client: &ConnectionOrchestrator,
    call: Option<&str>,
    arguments: Value,
) -> anyhow::Result<()> {
    let server = client.connect().await.context("connection failed")?;
    println!(
        "Connected to {} {} (protocol {})",
        server.server_info.name, server.server_info.version, server.protocol_version
    );
    if let Some(kind) = client.kind() {
        println!("Transport: {}", kind.label());
    }
    if let Some(session_id) = client.session_id() {
        println!("Session: {session_id}");
    }

    let tools = client.list_tools().await.context("tools/list failed")?;
    println!("Tools ({}):", tools.len());
    for tool in &tools {
        match &tool.description {
            Some(description) => println!("  {} - {description}", tool.name),
            None => println!("  {}", tool.name),
        }
    }

    if let Some(tool) = call {
        let result = client
            .call_tool(tool, arguments)
            .await
            .with_context(|| format!("tools/call {tool} failed"))?;
        print_result(tool, &result);
        if result.is_error == Some(true) {
            bail!("tool {tool} reported an error");
        }
    }
    Ok(())
}

fn parse_arguments(raw: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(value)
}

fn print_result(tool: &str, result: &CallToolResult) {
    println!("Result of {tool}:");
    for content in &result.content {
        match content {
            Content::Text { text } => println!("  {text}"),
            other => match serde_json::to_string(other) {
                Ok(json) => println!("  {json}"),
                Err(_) => println!("  <unprintable content>"),
            },
        }
    }
}
