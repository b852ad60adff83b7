// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

/// Rotating file writer for the node log, non-blocking on the hot path.
pub(super) fn file_rotater(
    dir: &Path,
    max_bytes: usize,
    max_lines: usize,
    logs_retained: usize,
    logs_uncompressed: usize,
) -> (NonBlocking, WorkerGuard) {
    let mut content_limit = ContentLimit::BytesSurpassed(max_bytes);
    if max_lines > 0 {
        content_limit = ContentLimit::Lines(max_lines);
    }

    // Keep logs_retained rotated files beyond the uncompressed window.
    let appender = FileRotate::new(
        dir.join("meshnode.log"),
        AppendTimestamp::default(FileLimit::MaxFiles(logs_retained + logs_uncompressed)),
        content_limit,
        Compression::OnRotate(logs_uncompressed),
        #[cfg(unix)]
        None,
    );

    tracing_appender::non_blocking(appender)
}
