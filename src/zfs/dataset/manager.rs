//! Dataset Manager
//!
//! Translates typed dataset requests into validated `zfs` invocations and
//! parses their output. The manager holds no state besides the executor, so
//! one instance serves any number of concurrent requests.
//!
//! Error policy: a generic command failure is re-classified under the code
//! of the operation that failed (`ZfsDatasetCreate`, ...). Failures the
//! executor already recognised (not found, permission denied) pass through
//! unchanged so callers can branch on them.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::types::*;
use crate::command::{CommandExecutor, CommandOptions, CommandOutput, CommandSpec, ZfsSubcommand};
use crate::error::{ErrorCode, RodentError, Result};
use crate::zfs::name::{
    parse_size, validate, validate_plain_dataset, validate_properties, validate_property_name,
    validate_property_value, DatasetName, NameKind,
};

/// Columns always fetched by `list`
const LIST_COLUMNS: &[&str] = &["name", "type", "used", "avail", "refer", "mountpoint"];

const GET_COLUMNS: &str = "name,property,value,source";

/// Manages datasets, snapshots, clones and bookmarks
#[derive(Debug, Clone)]
pub struct DatasetManager {
    executor: Arc<CommandExecutor>,
}

impl DatasetManager {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// Run a command, re-classifying generic failures under `code`
    pub(crate) async fn execute(
        &self,
        ctx: &CancellationToken,
        spec: CommandSpec,
        code: ErrorCode,
    ) -> Result<CommandOutput> {
        self.executor
            .run(ctx, &spec, CommandOptions::default())
            .await
            .map_err(|e| escalate(e, code))
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// List datasets in the order the engine prints them
    pub async fn list(&self, ctx: &CancellationToken, config: &ListConfig) -> Result<Vec<DatasetInfo>> {
        if let Some(name) = &config.name {
            validate(name, NameKind::Dataset)?;
        }
        for property in &config.properties {
            validate_property_name(property)?;
        }

        let mut columns = LIST_COLUMNS.to_vec();
        columns.extend(config.properties.iter().map(String::as_str));

        let spec = CommandSpec::zfs(ZfsSubcommand::List)
            .args(["-H", "-p", "-o"])
            .arg(columns.join(","))
            .arg("-t")
            .arg(config.dataset_type.as_str())
            .flag(config.recursive, "-r")
            .option("-d", config.depth.map(|d| d.to_string()))
            .args(config.name.clone());

        debug!("Listing {} datasets under {:?}", config.dataset_type.as_str(), config.name);
        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetList).await?;

        output
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| parse_list_row(line, &config.properties))
            .collect()
    }

    /// Whether a dataset, snapshot or bookmark exists
    pub async fn exists(&self, ctx: &CancellationToken, name: &str) -> Result<bool> {
        validate(name, NameKind::Dataset)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::List)
            .args(["-H", "-o", "name", "-t", "all"])
            .arg(name);

        match self.executor.run(ctx, &spec, CommandOptions::default()).await {
            Ok(_) => Ok(true),
            Err(e) if e.has_code(ErrorCode::ZfsDatasetNotFound) => Ok(false),
            Err(e) => Err(escalate(e, ErrorCode::ZfsDatasetList)),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a filesystem or volume
    pub async fn create(&self, ctx: &CancellationToken, config: &CreateConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;
        validate_properties(&config.properties)?;

        let mut spec = CommandSpec::zfs(ZfsSubcommand::Create)
            .flag(config.parents, "-p")
            .flag(config.no_mount, "-u");

        if config.kind == CreateKind::Volume {
            let size = config.size.as_deref().ok_or_else(|| {
                RodentError::new(ErrorCode::ZfsInvalidSize, "volume size is required")
            })?;
            let bytes = parse_size(size)?;
            let block_size = config
                .block_size
                .as_deref()
                .map(parse_size)
                .transpose()?;

            spec = spec
                .flag(config.sparse, "-s")
                .option("-b", block_size.map(|b| b.to_string()))
                .arg("-V")
                .arg(bytes.to_string());
        }

        let spec = spec.properties("-o", &config.properties).arg(&config.name);

        info!("Creating {:?} {}", config.kind, config.name);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetCreate).await?;
        Ok(())
    }

    pub async fn create_filesystem(&self, ctx: &CancellationToken, config: &CreateConfig) -> Result<()> {
        let config = CreateConfig {
            kind: CreateKind::Filesystem,
            ..config.clone()
        };
        self.create(ctx, &config).await
    }

    pub async fn create_volume(&self, ctx: &CancellationToken, config: &CreateConfig) -> Result<()> {
        let config = CreateConfig {
            kind: CreateKind::Volume,
            ..config.clone()
        };
        self.create(ctx, &config).await
    }

    /// Destroy a dataset, snapshot or bookmark
    pub async fn destroy(&self, ctx: &CancellationToken, config: &DestroyConfig) -> Result<()> {
        validate(&config.name, NameKind::Dataset)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Destroy)
            .flag(config.recursive, "-r")
            .flag(config.recursive_dependents, "-R")
            .flag(config.force, "-f")
            .flag(config.defer, "-d")
            .arg(&config.name);

        info!("Destroying {} (recursive: {})", config.name, config.recursive);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetDestroy).await?;
        Ok(())
    }

    /// Rename a dataset or snapshot; both names must be of the same kind
    pub async fn rename(&self, ctx: &CancellationToken, config: &RenameConfig) -> Result<()> {
        let from = DatasetName::parse(&config.name, NameKind::Dataset)?;
        let to = DatasetName::parse(&config.new_name, NameKind::Dataset)?;

        if from.delimiter() != to.delimiter() {
            return Err(RodentError::new(
                ErrorCode::ZfsDatasetRename,
                format!("{} and {} are different kinds", from, to),
            ));
        }
        if from.delimiter().is_some() && from.dataset() != to.dataset() {
            return Err(RodentError::new(
                ErrorCode::ZfsDatasetRename,
                format!("{} can only be renamed within {}", from, from.dataset()),
            ));
        }

        let spec = CommandSpec::zfs(ZfsSubcommand::Rename)
            .flag(config.parents, "-p")
            .flag(config.force, "-f")
            .flag(config.recursive, "-r")
            .arg(from.as_str())
            .arg(to.as_str());

        info!("Renaming {} to {}", from, to);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetRename).await?;
        Ok(())
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Fetch one property; unset user properties are reported as not found
    pub async fn get_property(&self, ctx: &CancellationToken, config: &PropertyConfig) -> Result<Property> {
        validate(&config.name, NameKind::Dataset)?;
        validate_property_name(&config.property)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Get)
            .args(["-H", "-p", "-o", GET_COLUMNS])
            .arg(&config.property)
            .arg(&config.name);

        debug!("Getting {} of {}", config.property, config.name);
        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetGetProperty).await?;

        let not_found = || {
            RodentError::new(
                ErrorCode::ZfsDatasetPropertyNotFound,
                format!("{} on {}", config.property, config.name),
            )
        };
        let property = parse_properties(&output.stdout)?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;

        // native properties such as `origin` legitimately read "-"; only an
        // unset user property is absent
        let user_property = config.property.contains(':');
        if user_property && property.value == "-" && property.source == PropertySource::None {
            return Err(not_found());
        }
        Ok(property)
    }

    pub async fn set_property(&self, ctx: &CancellationToken, config: &SetPropertyConfig) -> Result<()> {
        validate(&config.name, NameKind::Dataset)?;
        validate_property_name(&config.property)?;
        validate_property_value(&config.property, &config.value)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Set)
            .arg(format!("{}={}", config.property, config.value))
            .arg(&config.name);

        info!("Setting {}={} on {}", config.property, config.value, config.name);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetSetProperty).await?;
        Ok(())
    }

    pub async fn inherit_property(&self, ctx: &CancellationToken, config: &InheritConfig) -> Result<()> {
        validate(&config.name, NameKind::Dataset)?;
        validate_property_name(&config.property)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Inherit)
            .flag(config.recursive, "-r")
            .flag(config.revert, "-S")
            .arg(&config.property)
            .arg(&config.name);

        info!("Inheriting {} on {}", config.property, config.name);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetSetProperty).await?;
        Ok(())
    }

    /// Every property of a dataset
    pub async fn list_properties(&self, ctx: &CancellationToken, config: &NameConfig) -> Result<Vec<Property>> {
        validate(&config.name, NameKind::Dataset)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Get)
            .args(["-H", "-p", "-o", GET_COLUMNS, "all"])
            .arg(&config.name);

        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetGetProperty).await?;
        parse_properties(&output.stdout)
    }

    // =========================================================================
    // Snapshots, clones, bookmarks
    // =========================================================================

    pub async fn create_snapshot(&self, ctx: &CancellationToken, config: &SnapshotConfig) -> Result<()> {
        let snapshot = format!("{}@{}", config.dataset, config.name);
        validate(&snapshot, NameKind::Snapshot)?;
        validate_properties(&config.properties)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Snapshot)
            .flag(config.recursive, "-r")
            .properties("-o", &config.properties)
            .arg(&snapshot);

        info!("Creating snapshot {}", snapshot);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetSnapshot).await?;
        Ok(())
    }

    /// Roll a dataset back to a snapshot
    ///
    /// Destructive. Callers are expected to have confirmed intent already.
    pub async fn rollback(&self, ctx: &CancellationToken, config: &RollbackConfig) -> Result<()> {
        validate(&config.name, NameKind::Snapshot)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Rollback)
            .flag(config.destroy_recent, "-r")
            .flag(config.destroy_clones, "-R")
            .flag(config.force, "-f")
            .arg(&config.name);

        info!("Rolling back to {}", config.name);
        self.execute(ctx, spec, ErrorCode::ZfsSnapshotRollback).await?;
        Ok(())
    }

    pub async fn create_clone(&self, ctx: &CancellationToken, config: &CloneConfig) -> Result<()> {
        validate(&config.snapshot, NameKind::Snapshot)?;
        validate_plain_dataset(&config.target)?;
        validate_properties(&config.properties)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Clone)
            .flag(config.parents, "-p")
            .properties("-o", &config.properties)
            .arg(&config.snapshot)
            .arg(&config.target);

        info!("Cloning {} to {}", config.snapshot, config.target);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetClone).await?;
        Ok(())
    }

    /// Make a clone independent of its origin snapshot
    pub async fn promote_clone(&self, ctx: &CancellationToken, config: &NameConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Promote).arg(&config.name);

        info!("Promoting clone {}", config.name);
        self.execute(ctx, spec, ErrorCode::ZfsClonePromoteFailed).await?;
        Ok(())
    }

    pub async fn create_bookmark(&self, ctx: &CancellationToken, config: &BookmarkConfig) -> Result<()> {
        let snapshot = DatasetName::parse(&config.snapshot, NameKind::Snapshot)?;
        let bookmark = DatasetName::parse(&config.bookmark, NameKind::Bookmark)?;
        if snapshot.dataset() != bookmark.dataset() {
            return Err(RodentError::new(
                ErrorCode::ZfsBookmarkInvalidName,
                format!("{} must belong to {}", bookmark, snapshot.dataset()),
            ));
        }

        let spec = CommandSpec::zfs(ZfsSubcommand::Bookmark)
            .arg(snapshot.as_str())
            .arg(bookmark.as_str());

        info!("Creating bookmark {} from {}", bookmark, snapshot);
        self.execute(ctx, spec, ErrorCode::ZfsBookmarkFailed).await?;
        Ok(())
    }

    // =========================================================================
    // Mounting and sharing
    // =========================================================================

    pub async fn mount(&self, ctx: &CancellationToken, config: &MountConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Mount)
            .flag(config.overlay, "-O")
            .option("-o", config.options.clone())
            .arg(&config.name);

        info!("Mounting {}", config.name);
        self.execute(ctx, spec, ErrorCode::ZfsMountOperationFailed).await?;
        Ok(())
    }

    pub async fn unmount(&self, ctx: &CancellationToken, config: &UnmountConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Unmount)
            .flag(config.force, "-f")
            .arg(&config.name);

        info!("Unmounting {}", config.name);
        self.execute(ctx, spec, ErrorCode::ZfsUnmountOperationFailed).await?;
        Ok(())
    }

    pub async fn share(&self, ctx: &CancellationToken, config: &ShareConfig) -> Result<()> {
        let spec = share_target(CommandSpec::zfs(ZfsSubcommand::Share), config)?;
        info!("Sharing {}", config.name.as_deref().unwrap_or("all datasets"));
        self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;
        Ok(())
    }

    pub async fn unshare(&self, ctx: &CancellationToken, config: &ShareConfig) -> Result<()> {
        let spec = share_target(CommandSpec::zfs(ZfsSubcommand::Unshare), config)?;
        info!("Unsharing {}", config.name.as_deref().unwrap_or("all datasets"));
        self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;
        Ok(())
    }

    // =========================================================================
    // Diff
    // =========================================================================

    /// Changes between a snapshot and a later snapshot or the live filesystem
    pub async fn diff(&self, ctx: &CancellationToken, config: &DiffConfig) -> Result<Vec<DiffEntry>> {
        validate(&config.snapshot, NameKind::Snapshot)?;
        if let Some(target) = &config.target {
            validate(target, NameKind::Dataset)?;
        }

        let spec = CommandSpec::zfs(ZfsSubcommand::Diff)
            .arg("-H")
            .flag(config.file_types, "-F")
            .flag(config.timestamps, "-t")
            .arg(&config.snapshot)
            .args(config.target.clone());

        debug!("Diffing {} against {:?}", config.snapshot, config.target);
        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;

        output
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| parse_diff_line(line, config))
            .collect()
    }

    // =========================================================================
    // Delegated permissions
    // =========================================================================

    pub async fn allow(&self, ctx: &CancellationToken, config: &AllowConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;
        if config.permissions.is_empty() {
            return Err(RodentError::new(
                ErrorCode::ZfsDatasetOperation,
                "at least one permission is required",
            ));
        }

        let spec = CommandSpec::zfs(ZfsSubcommand::Allow)
            .flag(config.local, "-l")
            .flag(config.descendants, "-d");
        let spec = permission_target(spec, &config.target)?
            .arg(permission_list(&config.permissions)?)
            .arg(&config.name);

        info!("Delegating {:?} on {} to {:?}", config.permissions, config.name, config.target);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;
        Ok(())
    }

    pub async fn unallow(&self, ctx: &CancellationToken, config: &UnallowConfig) -> Result<()> {
        validate_plain_dataset(&config.name)?;

        let mut spec = CommandSpec::zfs(ZfsSubcommand::Unallow)
            .flag(config.recursive, "-r")
            .flag(config.local, "-l")
            .flag(config.descendants, "-d");
        spec = permission_target(spec, &config.target)?;
        if !config.permissions.is_empty() {
            spec = spec.arg(permission_list(&config.permissions)?);
        }
        let spec = spec.arg(&config.name);

        info!("Revoking {:?} on {} from {:?}", config.permissions, config.name, config.target);
        self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;
        Ok(())
    }

    /// Delegations on a dataset and the datasets it inherits from
    pub async fn list_permissions(
        &self,
        ctx: &CancellationToken,
        config: &NameConfig,
    ) -> Result<Vec<DatasetPermissions>> {
        validate_plain_dataset(&config.name)?;

        let spec = CommandSpec::zfs(ZfsSubcommand::Allow).arg(&config.name);
        let output = self.execute(ctx, spec, ErrorCode::ZfsDatasetOperation).await?;
        Ok(parse_permissions(&output.stdout))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Re-classify a generic command failure under an operation's code
pub(crate) fn escalate(err: RodentError, code: ErrorCode) -> RodentError {
    if err.has_code(ErrorCode::CommandExecution) {
        err.wrap(code)
    } else {
        err
    }
}

fn output_error(line: &str) -> RodentError {
    RodentError::new(ErrorCode::CommandOutputParse, format!("unexpected line: {:?}", line))
}

fn parse_number(field: &str) -> Option<u64> {
    field.parse().ok()
}

fn parse_list_row(line: &str, extra: &[String]) -> Result<DatasetInfo> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != LIST_COLUMNS.len() + extra.len() {
        return Err(output_error(line));
    }

    let properties = extra
        .iter()
        .zip(&fields[LIST_COLUMNS.len()..])
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect();

    Ok(DatasetInfo {
        name: fields[0].to_string(),
        dataset_type: fields[1].to_string(),
        used: parse_number(fields[2]),
        available: parse_number(fields[3]),
        referenced: parse_number(fields[4]),
        mountpoint: (fields[5] != "-").then(|| fields[5].to_string()),
        properties,
    })
}

fn parse_properties(output: &str) -> Result<Vec<Property>> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.splitn(4, '\t').collect();
            match fields.as_slice() {
                [name, property, value, source] => Ok(Property {
                    name: name.to_string(),
                    property: property.to_string(),
                    value: value.to_string(),
                    source: PropertySource::parse(source),
                }),
                _ => Err(output_error(line)),
            }
        })
        .collect()
}

fn parse_diff_line(line: &str, config: &DiffConfig) -> Result<DiffEntry> {
    let mut fields = line.split('\t');
    let mut next = || fields.next().ok_or_else(|| output_error(line));

    let timestamp = if config.timestamps {
        Some(next()?.to_string())
    } else {
        None
    };
    let change = DiffChange::from_marker(next()?).ok_or_else(|| output_error(line))?;
    let file_type = if config.file_types {
        Some(next()?.to_string())
    } else {
        None
    };
    let path = next()?.to_string();
    let new_path = if change == DiffChange::Renamed {
        Some(next()?.to_string())
    } else {
        None
    };

    Ok(DiffEntry {
        timestamp,
        change,
        file_type,
        path,
        new_path,
    })
}

fn parse_permissions(output: &str) -> Vec<DatasetPermissions> {
    let mut blocks: Vec<DatasetPermissions> = Vec::new();
    let mut section: Option<String> = None;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("---- Permissions on ") {
            blocks.push(DatasetPermissions {
                dataset: rest.trim_end_matches('-').trim().to_string(),
                ..Default::default()
            });
            section = None;
        } else if line.trim().is_empty() {
            continue;
        } else if !line.starts_with(char::is_whitespace) {
            section = line.trim().strip_suffix(':').map(str::to_string);
        } else if let (Some(block), Some(heading)) = (blocks.last_mut(), &section) {
            block
                .sections
                .entry(heading.clone())
                .or_default()
                .push(line.trim().to_string());
        }
    }
    blocks
}

fn share_target(spec: CommandSpec, config: &ShareConfig) -> Result<CommandSpec> {
    match (&config.name, config.all) {
        (_, true) => Ok(spec.arg("-a")),
        (Some(name), false) => {
            validate_plain_dataset(name)?;
            Ok(spec.arg(name))
        }
        (None, false) => Err(RodentError::new(
            ErrorCode::ZfsDatasetInvalidName,
            "a dataset name is required unless all is set",
        )),
    }
}

fn permission_target(spec: CommandSpec, target: &PermissionTarget) -> Result<CommandSpec> {
    Ok(match target {
        PermissionTarget::Users { names } => spec.arg("-u").arg(principal_list(names)?),
        PermissionTarget::Groups { names } => spec.arg("-g").arg(principal_list(names)?),
        PermissionTarget::Everyone => spec.arg("-e"),
        PermissionTarget::Create => spec.arg("-c"),
        PermissionTarget::Set { name } => {
            let set = if name.starts_with('@') {
                name.clone()
            } else {
                format!("@{}", name)
            };
            check_permission(&set)?;
            spec.arg("-s").arg(set)
        }
    })
}

fn principal_list(names: &[String]) -> Result<String> {
    let invalid = |why: String| Err(RodentError::new(ErrorCode::ZfsDatasetOperation, why));
    if names.is_empty() {
        return invalid("at least one user or group is required".into());
    }
    for name in names {
        if name.is_empty()
            || name.starts_with('-')
            || name.contains(|c: char| c == ',' || c.is_whitespace())
        {
            return invalid(format!("invalid user or group {:?}", name));
        }
    }
    Ok(names.join(","))
}

fn permission_list(permissions: &[String]) -> Result<String> {
    for permission in permissions {
        check_permission(permission)?;
    }
    Ok(permissions.join(","))
}

fn check_permission(permission: &str) -> Result<()> {
    let valid = !permission.is_empty()
        && !permission.starts_with('-')
        && permission
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@'));
    if valid {
        Ok(())
    } else {
        Err(RodentError::new(
            ErrorCode::ZfsDatasetOperation,
            format!("invalid permission {:?}", permission),
        ))
    }
}
