// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Tracing setup for a node process: one line per event, this crate's
//! targets only, to stdout or to a rotating file in a given directory.

mod appender;

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt as tracing_fmt,
    fmt::{
        format::Writer,
        time::{FormatTime, SystemTime},
        FmtContext, FormatEvent, FormatFields,
    },
    prelude::*,
    registry::LookupSpan,
    Layer, Registry,
};

/// Env var that overrides the log level of this crate's targets.
pub const LOG_LEVEL_ENV: &str = "MESHNODE_LOG";

// Rotating file limits for host-side runs.
const LOGS_MAX_BYTES: usize = 10 * 1024 * 1024;
const LOGS_MAX_LINES: usize = 5_000;
const LOGS_RETAINED: usize = 0;
const LOGS_UNCOMPRESSED: usize = 100;

/// One event per line: timestamp, level, module with the crate prefix
/// stripped. Node logs already lead with the node id, so no span context
/// is rendered.
#[derive(Default, Debug)]
struct NodeLogFormatter;

impl<S, N> FormatEvent<S, N> for NodeLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        SystemTime.format_time(&mut writer)?;

        let module = meta.module_path().unwrap_or("<unknown>");
        let module = module
            .strip_prefix(current_crate_str())
            .map(|rest| rest.trim_start_matches("::"))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(module);
        write!(writer, " {:>5} {module}: ", meta.level())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Inits node logging; with a directory, output rotates there and the
/// returned guard must be held for the life of the program.
///
/// Only this crate's targets are logged, at TRACE unless [`LOG_LEVEL_ENV`]
/// says otherwise. Logging should be instantiated only once.
pub fn init_node_logging(log_dir: &Option<PathBuf>) -> Option<WorkerGuard> {
    let level = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(LevelFilter::TRACE);
    let targets = Targets::new().with_target(current_crate_str(), level);

    let fmt_layer = tracing_fmt::layer()
        .with_ansi(false)
        .event_format(NodeLogFormatter);

    let (layer, guard): (Box<dyn Layer<Registry> + Send + Sync>, Option<WorkerGuard>) =
        match log_dir {
            Some(dir) => {
                println!("Starting logging to directory: {dir:?}");
                let (writer, guard) = appender::file_rotater(
                    dir,
                    LOGS_MAX_BYTES,
                    LOGS_MAX_LINES,
                    LOGS_RETAINED,
                    LOGS_UNCOMPRESSED,
                );
                (fmt_layer.with_writer(writer).boxed(), Some(guard))
            }
            None => {
                println!("Starting logging to stdout");
                (fmt_layer.boxed(), None)
            }
        };

    tracing_subscriber::registry()
        .with(layer.with_filter(targets))
        .init();
    guard
}

/// Root module name of this crate, the only logging target we care about.
fn current_crate_str() -> &'static str {
    module_path!().split("::").next().unwrap_or("meshnode")
}
