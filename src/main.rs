use std::path::PathBuf;

use clap::Parser;

use crate::state::{Settings, SpriteMode, DEFAULT_FRAME_RATE, DEFAULT_INSTRUCTIONS_PER_SECOND};

mod chip8;
mod emulator;
mod instruction;
mod state;

#[derive(Parser)]
#[command(version, about = "A CHIP-8 emulator for the terminal")]
struct Args {
    /// Path to the ROM to run
    rom: PathBuf,

    /// Instructions executed per second
    #[arg(long, default_value_t = DEFAULT_INSTRUCTIONS_PER_SECOND,
          value_parser = clap::value_parser!(u64).range(1..))]
    ips: u64,

    /// Timer and render rate in Hz
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE,
          value_parser = clap::value_parser!(u64).range(1..))]
    frame_rate: u64,

    /// Vertical sprite overflow behavior
    #[arg(long, value_enum, default_value = "wrap")]
    sprite_mode: SpriteMode,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::new(args.frame_rate, args.ips, args.sprite_mode, args.rom);

    let mut emulator = emulator::Emulator::new(settings)?;
    emulator.run()
}
