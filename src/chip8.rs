use anyhow::anyhow;

use crate::instruction::{decode, execute, Opcode};
use crate::state::{Chip8State, FrameBuffer, Key, Settings, MEM_SIZE};

/// One CHIP-8 machine: memory, registers, stack, timers, framebuffer, and
/// keypad, driven one fetch/execute cycle or one 60 Hz timer tick at a
/// time. Every loaded ROM gets a fresh instance.
pub struct Chip8 {
    pub(crate) state: Chip8State,
}

impl Chip8 {
    pub fn new(settings: Settings, rom: &[u8]) -> anyhow::Result<Self> {
        let mut state = Chip8State::new(settings);
        state.memory.load_rom(rom)?;
        Ok(Chip8 { state })
    }

    fn fetch(&mut self) -> anyhow::Result<Opcode> {
        if self.state.pc + 1 >= MEM_SIZE {
            return Err(anyhow!(
                "Program counter out of bounds: {:#05X}",
                self.state.pc
            ));
        }
        let high_byte = u16::from(self.state.memory.read(self.state.pc)?);
        let low_byte = u16::from(self.state.memory.read(self.state.pc + 1)?);

        // Move the program counter to the next instruction before dispatch
        self.state.pc += 2;

        Ok(decode((high_byte << 8) | low_byte))
    }

    /// Runs one instruction cycle.
    pub fn step(&mut self) -> anyhow::Result<()> {
        let opcode = self.fetch()?;
        execute(opcode, &mut self.state)
    }

    /// Runs one 60 Hz timer tick.
    pub fn tick_timers(&mut self) {
        self.state.tick_timers();
    }

    /// Whether the sound timer is running; the audio collaborator switches
    /// the beep on its edges.
    pub fn sound_active(&self) -> bool {
        self.state.sound_timer > 0
    }

    /// Hands the framebuffer to the render collaborator when it has changed
    /// since the last consumed frame, clearing the redraw flag.
    pub fn take_frame(&mut self) -> Option<FrameBuffer> {
        if self.state.draw_flag {
            self.state.draw_flag = false;
            Some(self.state.display)
        } else {
            None
        }
    }

    pub fn key_press(&mut self, key: Key) {
        self.state.keypad.press(key);
    }

    pub fn key_release(&mut self, key: Key) {
        self.state.keypad.release(key);
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Register, SpriteMode, PC_START_ADDR};
    use std::path::PathBuf;

    fn test_settings() -> Settings {
        Settings::new(60, 1000, SpriteMode::Wrap, PathBuf::from("test.ch8"))
    }

    #[test]
    fn test_construction_loads_rom_at_0x200() {
        let chip8 = Chip8::new(test_settings(), &[0x12, 0x34]).unwrap();
        assert_eq!(chip8.state.pc, PC_START_ADDR);
        assert_eq!(chip8.state.memory.read(0x200).unwrap(), 0x12);
        assert_eq!(chip8.state.memory.read(0x201).unwrap(), 0x34);
    }

    #[test]
    fn test_construction_rejects_oversized_rom() {
        let rom = vec![0; MEM_SIZE - PC_START_ADDR + 1];
        assert!(Chip8::new(test_settings(), &rom).is_err());
    }

    #[test]
    fn test_fetch_composes_big_endian_and_advances_pc() {
        let mut chip8 = Chip8::new(test_settings(), &[0x12, 0x34]).unwrap();
        let opcode = chip8.fetch().unwrap();
        assert_eq!(opcode, Opcode::Jump { addr: 0x234 });
        assert_eq!(chip8.state.pc, 0x202);
    }

    #[test]
    fn test_fetch_with_pc_past_memory_end_is_fatal() {
        let mut chip8 = Chip8::new(test_settings(), &[]).unwrap();
        chip8.state.pc = MEM_SIZE - 1;
        assert!(chip8.fetch().is_err());
    }

    #[test]
    fn test_step_executes_the_fetched_instruction() {
        // 6A42: load 0x42 into VA
        let mut chip8 = Chip8::new(test_settings(), &[0x6A, 0x42]).unwrap();
        chip8.step().unwrap();
        assert_eq!(chip8.state.registers.read(Register::VA), 0x42);
        assert_eq!(chip8.state.pc, 0x202);
    }

    #[test]
    fn test_take_frame_consumes_the_redraw_flag() {
        let mut chip8 = Chip8::new(test_settings(), &[0x00, 0xE0]).unwrap();
        assert!(chip8.take_frame().is_none());

        chip8.step().unwrap();
        assert!(chip8.take_frame().is_some());
        assert!(chip8.take_frame().is_none());
    }

    #[test]
    fn test_keys_are_forwarded_to_the_keypad() {
        let mut chip8 = Chip8::new(test_settings(), &[]).unwrap();
        chip8.key_press(Key::Key7);
        assert!(chip8.state.keypad.is_pressed(0x7));
        chip8.key_release(Key::Key7);
        assert!(!chip8.state.keypad.is_pressed(0x7));
    }

    #[test]
    fn test_sound_active_follows_the_sound_timer() {
        let mut chip8 = Chip8::new(test_settings(), &[]).unwrap();
        assert!(!chip8.sound_active());
        chip8.state.sound_timer = 1;
        assert!(chip8.sound_active());
        chip8.tick_timers();
        assert!(!chip8.sound_active());
    }
}
