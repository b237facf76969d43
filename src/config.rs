use clap::Parser;
use lazy_static::lazy_static;

/// Knobs the translation engine consumes directly.
///
/// Socket addresses, TLS material and state directories belong to the
/// external listener/config-file layer and aren't here; this only carries
/// values C1-C5 read at runtime.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Per-channel replay queue capacity before oldest-first drop.
    #[arg(long, default_value_t = 256)]
    pub replay_queue_capacity: usize,

    /// Max serialized IRC line length before the batch/length-extension
    /// capability is required.
    #[arg(long, default_value_t = 512)]
    pub max_line_bytes: usize,

    /// Source used for server-originated messages (numerics, JOIN/PART
    /// emitted on the user's behalf).
    #[arg(long, default_value = "server.")]
    pub server_name: String,
}

pub fn args() -> &'static Args {
    lazy_static! {
        static ref ARGS: Args = Args::parse();
    }
    &ARGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_server_ready_without_flags() {
        let args = Args::parse_from(["matrirc"]);
        assert_eq!(args.replay_queue_capacity, 256);
        assert_eq!(args.max_line_bytes, 512);
        assert_eq!(args.server_name, "server.");
    }
}
