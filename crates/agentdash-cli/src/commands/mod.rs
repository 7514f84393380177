// CLI subcommands

pub mod emit;
pub mod events;
pub mod sessions;
