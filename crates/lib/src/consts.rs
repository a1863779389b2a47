//! Shared constants for shipwright.

/// Application name used for config, data and cache directories.
pub const APP_NAME: &str = "shipwright";

/// Name of the checksum manifest uploaded next to every published version.
pub const CHECKSUMS_FILE: &str = "checksums.txt";

/// Environment used for the release pointer when none is given.
pub const DEFAULT_ENVIRONMENT: &str = "release";

/// Default number of concurrent compile workers.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Default overall timeout for a download, in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a single download attempt, in seconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;

/// Capacity, in chunks, of the in-memory pipe between compressor and uploader.
pub const PIPE_CAPACITY: usize = 16;

/// Size of the chunks the compressor hands to the uploader.
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of the temporary file a download is written to before rename.
pub const DOWNLOAD_TMP_SUFFIX: &str = ".tmp";
