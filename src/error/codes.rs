//! Error code table
//!
//! Every code belongs to exactly one domain and carries a fixed message and
//! HTTP status. The table is a compile-time `match`, so lookups never lock and
//! never change at runtime.
//!
//! Code ranges:
//!
//! | Range     | Domain      |
//! |-----------|-------------|
//! | 1000-1099 | `CONFIG`    |
//! | 1100-1199 | `SERVER`    |
//! | 1300-1399 | `CMD`       |
//! | 1400-1499 | `HEALTH`    |
//! | 1500-1699 | `LIFECYCLE` |
//! | 2000-2999 | `ZFS`       |

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Domain
// =============================================================================

/// Subsystem an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "CONFIG")]
    Config,
    #[serde(rename = "SERVER")]
    Server,
    #[serde(rename = "ZFS")]
    Zfs,
    #[serde(rename = "CMD")]
    Command,
    #[serde(rename = "HEALTH")]
    Health,
    #[serde(rename = "LIFECYCLE")]
    Lifecycle,
    /// Raw code with no entry in the table
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Domain {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Domain::Config => "CONFIG",
            Domain::Server => "SERVER",
            Domain::Zfs => "ZFS",
            Domain::Command => "CMD",
            Domain::Health => "HEALTH",
            Domain::Lifecycle => "LIFECYCLE",
            Domain::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Definitions
// =============================================================================

/// The (domain, message, status) triple registered for a code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDefinition {
    pub domain: Domain,
    pub message: &'static str,
    pub http_status: u16,
}

/// Definition returned for raw codes missing from the table
pub const UNKNOWN_DEFINITION: ErrorDefinition = ErrorDefinition {
    domain: Domain::Unknown,
    message: "Unknown error",
    http_status: 500,
};

macro_rules! error_codes {
    ($(
        $(#[$doc:meta])*
        $variant:ident = $code:literal => ($domain:ident, $status:literal, $message:literal),
    )*) => {
        /// Stable numeric error identifiers
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum ErrorCode {
            $( $(#[$doc])* $variant = $code, )*
        }

        impl ErrorCode {
            /// Every registered code, in numeric order
            pub const ALL: &'static [ErrorCode] = &[ $( ErrorCode::$variant, )* ];

            /// Look up the registered definition for this code
            pub const fn definition(self) -> ErrorDefinition {
                match self {
                    $(
                        ErrorCode::$variant => ErrorDefinition {
                            domain: Domain::$domain,
                            message: $message,
                            http_status: $status,
                        },
                    )*
                }
            }

            /// Map a raw number back to its code, if registered
            pub const fn from_raw(raw: u16) -> Option<ErrorCode> {
                match raw {
                    $( $code => Some(ErrorCode::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    // Configuration (1000-1099)
    ConfigNotFound = 1000 => (Config, 404, "Configuration file not found"),
    ConfigInvalid = 1001 => (Config, 400, "Invalid configuration format"),
    ConfigLoadFailed = 1002 => (Config, 500, "Failed to load configuration"),
    ConfigWriteFailed = 1003 => (Config, 500, "Failed to write configuration"),
    ConfigPermissionDenied = 1004 => (Config, 403, "Permission denied accessing config"),
    ConfigDirectoryError = 1005 => (Config, 500, "Config directory error"),
    ConfigValidationFailed = 1006 => (Config, 400, "Configuration validation failed"),
    ConfigMarshalFailed = 1007 => (Config, 500, "Failed to serialize configuration"),
    ConfigUnmarshalFailed = 1008 => (Config, 500, "Failed to deserialize configuration"),
    ConfigHomeDirectoryError = 1009 => (Config, 500, "Failed to get home directory"),

    // Server (1100-1199)
    ServerStart = 1100 => (Server, 500, "Failed to start server"),
    ServerShutdown = 1101 => (Server, 500, "Error during server shutdown"),
    ServerBind = 1102 => (Server, 500, "Failed to bind server port"),
    ServerTimeout = 1103 => (Server, 504, "Server operation timed out"),
    ServerMiddleware = 1104 => (Server, 500, "Middleware execution failed"),
    ServerRouting = 1105 => (Server, 500, "Route handling error"),
    ServerRequestValidation = 1106 => (Server, 400, "Request validation failed"),
    ServerResponseError = 1107 => (Server, 500, "Error generating response"),
    /// The caller's cancellation token fired while an operation was running
    ServerContextCancelled = 1108 => (Server, 503, "Server context cancelled"),
    ServerTlsError = 1109 => (Server, 500, "TLS configuration error"),

    // Command execution (1300-1399)
    CommandNotFound = 1300 => (Command, 404, "Command not found"),
    CommandExecution = 1301 => (Command, 400, "Command execution failed"),
    CommandTimeout = 1302 => (Command, 504, "Command execution timed out"),
    CommandPermission = 1303 => (Command, 403, "Permission denied executing command"),
    CommandInvalidInput = 1304 => (Command, 400, "Invalid command input"),
    CommandOutputParse = 1305 => (Command, 500, "Failed to parse command output"),
    CommandSignal = 1306 => (Command, 500, "Command signal handling failed"),
    CommandContext = 1307 => (Command, 500, "Command context error"),
    CommandPipe = 1308 => (Command, 500, "Command pipe operation failed"),
    CommandWorkDir = 1309 => (Command, 500, "Working directory error"),

    // Health check (1400-1499)
    HealthCheckFailed = 1400 => (Health, 503, "Health check failed"),
    HealthCheckTimeout = 1401 => (Health, 504, "Health check timed out"),
    HealthCheckComponent = 1402 => (Health, 503, "Component health check failed"),
    HealthCheckConfig = 1403 => (Health, 500, "Health check configuration error"),
    HealthCheckEndpoint = 1404 => (Health, 503, "Health check endpoint error"),
    HealthCheckClient = 1405 => (Health, 500, "Health check client error"),
    HealthCheckValidation = 1406 => (Health, 400, "Health check validation failed"),
    HealthCheckThreshold = 1407 => (Health, 503, "Health check threshold exceeded"),
    HealthCheckState = 1408 => (Health, 500, "Health check state error"),
    HealthCheckRecovery = 1409 => (Health, 500, "Health check recovery failed"),

    // Lifecycle (1500-1599)
    LifecyclePid = 1500 => (Lifecycle, 500, "PID file operation failed"),
    LifecycleShutdown = 1501 => (Lifecycle, 500, "Error during shutdown process"),
    LifecycleSignal = 1502 => (Lifecycle, 500, "Signal handling error"),
    LifecycleReload = 1503 => (Lifecycle, 500, "Configuration reload failed"),
    LifecycleHook = 1504 => (Lifecycle, 500, "Lifecycle hook execution failed"),
    LifecycleState = 1505 => (Lifecycle, 500, "Invalid lifecycle state transition"),
    LifecycleLock = 1506 => (Lifecycle, 500, "Failed to acquire lifecycle lock"),
    LifecycleCleanup = 1507 => (Lifecycle, 500, "Lifecycle cleanup failed"),
    LifecycleDaemon = 1508 => (Lifecycle, 500, "Daemon operation failed"),
    LifecycleResource = 1509 => (Lifecycle, 500, "Resource management error"),
    Misc = 1600 => (Lifecycle, 500, "Miscellaneous program error"),

    // ZFS operations (2000-2999)
    ZfsCommandFailed = 2000 => (Zfs, 500, "ZFS command execution failed"),
    ZfsPoolNotFound = 2001 => (Zfs, 404, "ZFS pool not found"),
    ZfsPermissionDenied = 2002 => (Zfs, 403, "Permission denied for ZFS operation"),
    ZfsPropertyError = 2003 => (Zfs, 500, "ZFS property operation failed"),
    ZfsPropertyValueTooLong = 2004 => (Zfs, 400, "ZFS property value too long"),
    ZfsInvalidPropertyValue = 2005 => (Zfs, 400, "ZFS invalid property value"),
    ZfsMountError = 2006 => (Zfs, 500, "ZFS mount operation failed"),
    ZfsInvalidMountPoint = 2007 => (Zfs, 400, "Invalid mount point"),
    ZfsRestrictedMountPoint = 2008 => (Zfs, 403, "Mount point not allowed"),
    ZfsCloneError = 2009 => (Zfs, 500, "ZFS clone operation failed"),
    ZfsQuotaError = 2010 => (Zfs, 500, "ZFS quota operation failed"),
    ZfsIoError = 2011 => (Zfs, 500, "ZFS I/O operation failed"),
    ZfsInvalidSize = 2012 => (Zfs, 400, "Invalid size specified"),
    ZfsQuotaExceeded = 2013 => (Zfs, 403, "Dataset quota exceeded"),
    ZfsQuotaInvalid = 2014 => (Zfs, 400, "ZFS invalid quota"),
    ZfsPermissionError = 2015 => (Zfs, 403, "Permission denied for ZFS operation"),

    ZfsNameLeadingSlash = 2016 => (Zfs, 400, "Leading slash in name"),
    ZfsNameEmptyComponent = 2017 => (Zfs, 400, "Empty component in name"),
    ZfsNameTrailingSlash = 2018 => (Zfs, 400, "Trailing slash in name"),
    ZfsNameInvalidChar = 2019 => (Zfs, 400, "Invalid character in name"),
    ZfsNameMultipleDelimiters = 2020 => (Zfs, 400, "Multiple delimiters in name"),
    ZfsNameNoLetter = 2021 => (Zfs, 400, "Name must begin with a letter"),
    ZfsNameReserved = 2022 => (Zfs, 400, "Name is reserved"),
    ZfsNameDiskLike = 2023 => (Zfs, 400, "Reserved disk name (c[0-9].*)"),
    ZfsNameTooLong = 2024 => (Zfs, 400, "Name is too long"),
    ZfsNameSelfRef = 2025 => (Zfs, 400, "Name is self reference"),
    ZfsNameParentRef = 2026 => (Zfs, 400, "Name is parent reference"),
    ZfsNameNoAtSign = 2027 => (Zfs, 400, "Missing '@' in snapshot name"),
    ZfsNameNoPound = 2028 => (Zfs, 400, "Missing '#' in bookmark name"),
    ZfsNameInvalid = 2029 => (Zfs, 400, "Invalid name"),

    ZfsDatasetNotFound = 2030 => (Zfs, 404, "ZFS dataset not found"),
    ZfsDatasetCreate = 2031 => (Zfs, 400, "Failed to create ZFS dataset"),
    ZfsDatasetList = 2032 => (Zfs, 400, "Failed to list ZFS datasets"),
    ZfsDatasetDestroy = 2033 => (Zfs, 400, "Failed to destroy ZFS dataset"),
    ZfsDatasetGetProperty = 2034 => (Zfs, 400, "Failed to get dataset property"),
    ZfsDatasetSetProperty = 2035 => (Zfs, 400, "Failed to set dataset property"),
    ZfsDatasetPropertyNotFound = 2036 => (Zfs, 404, "Dataset property not found"),
    ZfsDatasetClone = 2037 => (Zfs, 400, "Failed to clone dataset"),
    ZfsDatasetInvalidName = 2038 => (Zfs, 400, "Invalid dataset name"),
    ZfsDatasetInvalidProperty = 2039 => (Zfs, 400, "Invalid property value"),
    ZfsDatasetRename = 2040 => (Zfs, 400, "Failed to rename dataset"),
    ZfsDatasetSnapshot = 2041 => (Zfs, 400, "Failed to create snapshot"),
    ZfsDatasetOperation = 2042 => (Zfs, 400, "Failed to perform dataset operation"),

    ZfsDatasetSend = 2043 => (Zfs, 400, "Failed to send dataset"),
    ZfsDatasetReceive = 2044 => (Zfs, 400, "Failed to receive dataset"),
    ZfsDatasetNoReceiveToken = 2045 => (Zfs, 404, "No receive resume token"),

    ZfsSnapshotList = 2046 => (Zfs, 400, "Failed to list snapshots"),
    ZfsSnapshotDestroy = 2047 => (Zfs, 400, "Failed to destroy snapshot"),
    ZfsSnapshotRollback = 2048 => (Zfs, 400, "Failed to rollback snapshot"),
    ZfsSnapshotFailed = 2049 => (Zfs, 400, "Failed to create/manage snapshot"),
    ZfsSnapshotInvalidName = 2050 => (Zfs, 400, "Invalid snapshot name"),
    ZfsSnapshotInvalidProperty = 2051 => (Zfs, 400, "Invalid snapshot property value"),

    ZfsBookmarkFailed = 2052 => (Zfs, 500, "Failed to create/list bookmark"),
    ZfsBookmarkInvalidName = 2053 => (Zfs, 400, "Invalid bookmark name"),
    ZfsBookmarkInvalidProperty = 2054 => (Zfs, 400, "Invalid bookmark property value"),

    ZfsClonePromoteFailed = 2055 => (Zfs, 400, "Failed to promote clone"),
    ZfsMountOperationFailed = 2056 => (Zfs, 500, "Failed to mount dataset"),
    ZfsUnmountOperationFailed = 2057 => (Zfs, 500, "Failed to unmount dataset"),
    ZfsPoolScrubFailed = 2058 => (Zfs, 500, "Failed to scrub pool"),
    ZfsPoolResilverFailed = 2059 => (Zfs, 500, "Failed to resilver pool"),

    ZfsVolumeOperationFailed = 2060 => (Zfs, 500, "ZFS volume operation failed"),

    ZfsPoolCreate = 2061 => (Zfs, 400, "Failed to create ZFS pool"),
    ZfsPoolImport = 2062 => (Zfs, 400, "Failed to import ZFS pool"),
    ZfsPoolExport = 2063 => (Zfs, 400, "Failed to export ZFS pool"),
    ZfsPoolStatus = 2064 => (Zfs, 400, "Failed to get pool status"),
    ZfsPoolList = 2065 => (Zfs, 400, "Failed to get pool list"),
    ZfsPoolDestroy = 2066 => (Zfs, 400, "Failed to destroy pool"),
    ZfsPoolGetProperty = 2067 => (Zfs, 400, "Failed to get pool property"),
    ZfsPoolSetProperty = 2068 => (Zfs, 400, "Failed to set pool property"),
    ZfsPoolPropertyNotFound = 2069 => (Zfs, 404, "Pool property not found"),
    ZfsPoolInvalidName = 2070 => (Zfs, 400, "Invalid pool name"),
    ZfsPoolInvalidDevice = 2071 => (Zfs, 400, "Invalid device"),
    ZfsPoolDeviceOperation = 2072 => (Zfs, 400, "Failed to perform zpool device operation"),
    ZfsPoolTooManyDevices = 2073 => (Zfs, 403, "ZFS too many devices"),
    ZfsPoolRestrictedDevice = 2074 => (Zfs, 403, "ZFS device not allowed"),
}

impl ErrorCode {
    /// Numeric value of the code
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn domain(self) -> Domain {
        self.definition().domain
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Classify a raw numeric code
///
/// Unregistered codes degrade to [`UNKNOWN_DEFINITION`] instead of failing.
pub fn classify(code: u16) -> ErrorDefinition {
    ErrorCode::from_raw(code)
        .map(ErrorCode::definition)
        .unwrap_or(UNKNOWN_DEFINITION)
}
