//! Transfer Engine
//!
//! Replicates snapshots with `zfs send | zfs receive`. The send side always
//! runs locally; the receive side runs wherever the [`StreamTransport`]
//! chosen for the request puts it. The stream flows through one in-process
//! pipe, so nothing is buffered beyond the copy window.
//!
//! Failures keep the classification the executor gave them and gain
//! `transfer_stage`, `transfer_mode`, `send_command` and `receive_command`
//! metadata. A failed resumable receive on this host also reports the
//! resume token the engine left behind.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::DatasetManager;
use super::transport::transport_for;
use super::types::{NameConfig, ReceiveConfig, SendConfig};
use crate::command::{CommandOptions, CommandSpec, ZfsSubcommand, PIPE_SIDE};
use crate::error::{ErrorCode, RodentError, Result};
use crate::zfs::name::{
    validate, validate_plain_dataset, validate_properties, validate_property_name, DatasetName,
    NameKind,
};

pub const TRANSFER_STAGE: &str = "transfer_stage";
pub const TRANSFER_MODE: &str = "transfer_mode";
pub const SEND_COMMAND: &str = "send_command";
pub const RECEIVE_COMMAND: &str = "receive_command";
pub const RECEIVE_RESUME_TOKEN: &str = "receive_resume_token";

const TOKEN_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of stream being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Full,
    Incremental,
    Resume,
}

impl TransferMode {
    pub fn of(config: &SendConfig) -> Self {
        if config.resume_token.is_some() {
            TransferMode::Resume
        } else if config.from_snapshot.is_some() {
            TransferMode::Incremental
        } else {
            TransferMode::Full
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Full => "full",
            TransferMode::Incremental => "incremental",
            TransferMode::Resume => "resume",
        }
    }
}

// =============================================================================
// Command construction
// =============================================================================

/// Build the `zfs send` invocation
pub fn build_send(config: &SendConfig) -> Result<CommandSpec> {
    if let Some(token) = &config.resume_token {
        check_token(token)?;
        return Ok(CommandSpec::zfs(ZfsSubcommand::Send)
            .arg("-t")
            .arg(token)
            .flag(config.verbose, "-v")
            .flag(config.progress, "-P"));
    }

    let snapshot = DatasetName::parse(&config.snapshot, NameKind::Snapshot)?;
    let from = match &config.from_snapshot {
        Some(from) => {
            let full = if from.starts_with(['@', '#']) {
                format!("{}{}", snapshot.dataset(), from)
            } else {
                from.clone()
            };
            let base = DatasetName::parse(&full, NameKind::Dataset)?;
            if base.delimiter().is_none() {
                return Err(RodentError::new(
                    ErrorCode::ZfsSnapshotInvalidName,
                    format!("incremental base {} is not a snapshot or bookmark", full),
                ));
            }
            Some(full)
        }
        None => None,
    };

    let incremental_flag = if config.intermediary { "-I" } else { "-i" };
    Ok(CommandSpec::zfs(ZfsSubcommand::Send)
        .flag(config.compressed, "-c")
        .flag(config.properties, "-p")
        .flag(config.raw, "-w")
        .flag(config.large_blocks, "-L")
        .flag(config.embed_data, "-e")
        .flag(config.replicate, "-R")
        .flag(config.verbose, "-v")
        .flag(config.progress, "-P")
        .option(incremental_flag, from)
        .arg(snapshot.as_str()))
}

/// Build the local `zfs receive` invocation
pub fn build_receive(config: &ReceiveConfig) -> Result<CommandSpec> {
    validate_plain_dataset(&config.target)?;
    validate_properties(&config.properties)?;
    for property in &config.exclude_properties {
        validate_property_name(property)?;
    }
    if config.use_parent && config.use_last_component {
        return Err(RodentError::new(
            ErrorCode::ZfsDatasetReceive,
            "use_parent and use_last_component are mutually exclusive",
        ));
    }

    let mut spec = CommandSpec::zfs(ZfsSubcommand::Receive)
        .flag(config.force, "-F")
        .flag(config.resumable, "-s")
        .flag(config.no_mount, "-u")
        .flag(config.use_parent, "-d")
        .flag(config.use_last_component, "-e")
        .properties("-o", &config.properties);
    for property in &config.exclude_properties {
        spec = spec.arg("-x").arg(property);
    }
    Ok(spec.arg(&config.target))
}

/// Dataset that ends up holding the received stream
pub fn received_dataset(send: &SendConfig, receive: &ReceiveConfig) -> String {
    let Ok(snapshot) = DatasetName::parse(&send.snapshot, NameKind::Snapshot) else {
        return receive.target.clone();
    };
    let components = snapshot.components();

    if receive.use_parent && components.len() > 1 {
        format!("{}/{}", receive.target, components[1..].join("/"))
    } else if receive.use_last_component {
        match components.last() {
            Some(last) => format!("{}/{}", receive.target, last),
            None => receive.target.clone(),
        }
    } else {
        receive.target.clone()
    }
}

fn check_token(token: &str) -> Result<()> {
    let valid = !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RodentError::new(
            ErrorCode::CommandInvalidInput,
            "malformed receive resume token",
        ))
    }
}

// =============================================================================
// Orchestration
// =============================================================================

impl DatasetManager {
    /// Stream a snapshot (or resume an interrupted stream) into a target
    pub async fn send_receive(
        &self,
        ctx: &CancellationToken,
        send: &SendConfig,
        receive: &ReceiveConfig,
    ) -> Result<()> {
        let mode = TransferMode::of(send);
        let send_spec = build_send(send)?;
        let receive_spec = build_receive(receive)?;

        let transport = transport_for(receive);
        let consumer = transport.prepare(receive_spec).await?;

        info!(
            "Starting {} transfer of {} to {} via {}",
            mode.as_str(),
            if mode == TransferMode::Resume { "resume token" } else { send.snapshot.as_str() },
            receive.target,
            transport.name()
        );

        let outcome = self
            .executor()
            .pipe(ctx, &send_spec, &consumer, CommandOptions::unbounded())
            .await;

        let err = match outcome {
            Ok(()) => {
                info!("Finished {} transfer to {}", mode.as_str(), receive.target);
                return Ok(());
            }
            Err(err) => err,
        };

        let stage = match err.metadata_value(PIPE_SIDE) {
            Some("producer") => "send",
            Some("consumer") => "receive",
            _ => "stream",
        };
        warn!("{} transfer to {} failed during {}: {}", mode.as_str(), receive.target, stage, err);

        let mut err = err
            .with_metadata(TRANSFER_STAGE, stage)
            .with_metadata(TRANSFER_MODE, mode.as_str())
            .with_metadata(SEND_COMMAND, send_spec.to_string())
            .with_metadata(RECEIVE_COMMAND, consumer.to_string());

        if receive.resumable && receive.remote_config.is_none() {
            let dataset = received_dataset(send, receive);
            if let Some(token) = self.lookup_resume_token(&dataset).await {
                err = err.with_metadata(RECEIVE_RESUME_TOKEN, token);
            }
        }
        Err(err)
    }

    /// The token a partially received stream left on `name`
    pub async fn get_resume_token(&self, ctx: &CancellationToken, config: &NameConfig) -> Result<String> {
        validate_plain_dataset(&config.name)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Get)
            .args(["-H", "-o", "value", "receive_resume_token"])
            .arg(&config.name);
        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetGetProperty).await?;

        match output.stdout.trim() {
            "" | "-" => Err(RodentError::new(
                ErrorCode::ZfsDatasetNoReceiveToken,
                config.name.as_str(),
            )),
            token => Ok(token.to_string()),
        }
    }

    /// Best-effort token lookup after a failed transfer
    ///
    /// Runs under its own short deadline: the caller's token may be the very
    /// reason the transfer stopped.
    async fn lookup_resume_token(&self, dataset: &str) -> Option<String> {
        if validate(dataset, NameKind::Dataset).is_err() {
            return None;
        }
        let ctx = CancellationToken::new();
        let config = NameConfig {
            name: dataset.to_string(),
        };
        let lookup = self.get_resume_token(&ctx, &config);

        match tokio::time::timeout(TOKEN_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(token)) => Some(token),
            Ok(Err(e)) => {
                debug!("No resume token on {}: {}", dataset, e);
                None
            }
            Err(_) => {
                debug!("Resume token lookup on {} timed out", dataset);
                None
            }
        }
    }
}
