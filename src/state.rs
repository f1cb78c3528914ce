use std::path::PathBuf;

use anyhow::anyhow;
use bitvec::{array::BitArray, BitArr};
use clap::ValueEnum;

pub type Timer = u8;
pub type Address = usize;
pub type FrameBuffer = BitArr!(for DISPLAY_WIDTH * DISPLAY_HEIGHT);

pub const MEM_SIZE: usize = 4096;
pub const FONT_ADDR: Address = 0x000;
pub const FONT_HEIGHT: usize = 5;
pub const PC_START_ADDR: Address = 0x200;
pub const NUM_REGISTERS: usize = 16;
pub const NUM_KEYS: usize = 16;
pub const STACK_DEPTH: usize = 16;
pub const DISPLAY_WIDTH: usize = 64;
pub const DISPLAY_HEIGHT: usize = 32;
pub const DEFAULT_FRAME_RATE: u64 = 60;
pub const DEFAULT_INSTRUCTIONS_PER_SECOND: u64 = 1000;

pub struct Memory {
    data: [u8; MEM_SIZE],
}
impl Memory {
    pub fn new() -> Self {
        let font_data = [
            0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
            0x20, 0x60, 0x20, 0x20, 0x70, // 1
            0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
            0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
            0x90, 0x90, 0xF0, 0x10, 0x10, // 4
            0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
            0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
            0xF0, 0x10, 0x20, 0x40, 0x40, // 7
            0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
            0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
            0xF0, 0x90, 0xF0, 0x90, 0x90, // A
            0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
            0xF0, 0x80, 0x80, 0x80, 0xF0, // C
            0xE0, 0x90, 0x90, 0x90, 0xE0, // D
            0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
            0xF0, 0x80, 0xF0, 0x80, 0x80, // F
        ];
        let data = {
            let mut data = [0; MEM_SIZE];
            data[FONT_ADDR..FONT_ADDR + font_data.len()].copy_from_slice(&font_data);
            data
        };

        Memory { data }
    }

    pub fn read(&self, addr: Address) -> anyhow::Result<u8> {
        if addr >= MEM_SIZE {
            return Err(anyhow!("Memory read out of bounds: {:#05X}", addr));
        }
        Ok(self.data[addr])
    }

    pub fn write(&mut self, addr: Address, value: u8) -> anyhow::Result<()> {
        if addr >= MEM_SIZE {
            return Err(anyhow!("Memory write out of bounds: {:#05X}", addr));
        }
        self.data[addr] = value;
        Ok(())
    }

    pub fn load_rom(&mut self, rom: &[u8]) -> anyhow::Result<()> {
        if rom.len() > MEM_SIZE - PC_START_ADDR {
            return Err(anyhow!(
                "ROM of {} bytes exceeds the {} bytes of program memory",
                rom.len(),
                MEM_SIZE - PC_START_ADDR
            ));
        }
        self.data[PC_START_ADDR..PC_START_ADDR + rom.len()].copy_from_slice(rom);
        Ok(())
    }

    pub fn read_sprite(&self, index: Address, rows: u8) -> anyhow::Result<&[u8]> {
        let sprite_slice = index..index + rows as usize;

        if sprite_slice.end > MEM_SIZE {
            return Err(anyhow!("Sprite data out of bounds: {:#05X}", index));
        }
        Ok(&self.data[sprite_slice])
    }
}

#[derive(Copy, Clone)]
pub enum Register {
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V8,
    V9,
    VA,
    VB,
    VC,
    VD,
    VE,
    VF,
}
impl Register {
    pub fn from_index(value: usize) -> anyhow::Result<Self> {
        match value {
            0 => Ok(Register::V0),
            1 => Ok(Register::V1),
            2 => Ok(Register::V2),
            3 => Ok(Register::V3),
            4 => Ok(Register::V4),
            5 => Ok(Register::V5),
            6 => Ok(Register::V6),
            7 => Ok(Register::V7),
            8 => Ok(Register::V8),
            9 => Ok(Register::V9),
            10 => Ok(Register::VA),
            11 => Ok(Register::VB),
            12 => Ok(Register::VC),
            13 => Ok(Register::VD),
            14 => Ok(Register::VE),
            15 => Ok(Register::VF),
            _ => Err(anyhow!("Invalid register index: {}", value)),
        }
    }
}

pub struct RegisterBank {
    registers: [u8; NUM_REGISTERS],
}
impl RegisterBank {
    pub fn new() -> Self {
        RegisterBank {
            registers: [0; NUM_REGISTERS],
        }
    }

    pub fn read(&self, reg: Register) -> u8 {
        self.registers[reg as usize]
    }

    pub fn write(&mut self, reg: Register, value: u8) {
        self.registers[reg as usize] = value;
    }
}

/// Fixed-depth return-address stack. Overflow and underflow are distinct
/// errors rather than silent wraps since they indicate a malformed ROM.
pub struct CallStack {
    frames: [Address; STACK_DEPTH],
    sp: usize,
}
impl CallStack {
    pub fn new() -> Self {
        CallStack {
            frames: [0; STACK_DEPTH],
            sp: 0,
        }
    }

    pub fn push(&mut self, addr: Address) -> anyhow::Result<()> {
        if self.sp == STACK_DEPTH {
            return Err(anyhow!("Stack overflow: call depth exceeds {}", STACK_DEPTH));
        }
        self.frames[self.sp] = addr;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> anyhow::Result<Address> {
        if self.sp == 0 {
            return Err(anyhow!("Stack underflow: no return address available"));
        }
        self.sp -= 1;
        Ok(self.frames[self.sp])
    }

    pub fn depth(&self) -> usize {
        self.sp
    }
}

#[derive(Copy, Clone, PartialEq)]
pub enum Key {
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
}

pub struct Keypad {
    pressed: [bool; NUM_KEYS],
}
impl Keypad {
    pub fn new() -> Self {
        Keypad {
            pressed: [false; NUM_KEYS],
        }
    }

    pub fn press(&mut self, key: Key) {
        self.pressed[key as usize] = true;
    }

    pub fn release(&mut self, key: Key) {
        self.pressed[key as usize] = false;
    }

    /// Key codes come straight out of a V register, so anything above 0xF
    /// is simply never pressed.
    pub fn is_pressed(&self, code: u8) -> bool {
        usize::from(code) < NUM_KEYS && self.pressed[usize::from(code)]
    }
}

/// Vertical sprite overflow behavior. ROMs disagree on whether rows past
/// the bottom of the screen wrap around or get clipped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SpriteMode {
    Wrap,
    Clip,
}

pub struct Settings {
    pub frame_rate: u64,
    pub ips: u64,
    pub sprite_mode: SpriteMode,
    pub rom: PathBuf,
}
impl Settings {
    pub fn new(frame_rate: u64, ips: u64, sprite_mode: SpriteMode, rom: PathBuf) -> Self {
        Settings {
            frame_rate,
            ips,
            sprite_mode,
            rom,
        }
    }
}

pub struct Chip8State {
    pub settings: Settings,
    pub memory: Memory,
    pub registers: RegisterBank,
    pub pc: Address,
    pub index: Address,
    pub stack: CallStack,
    pub delay_timer: Timer,
    pub sound_timer: Timer,
    pub display: FrameBuffer,
    pub draw_flag: bool,
    pub keypad: Keypad,
}
impl Chip8State {
    pub fn new(settings: Settings) -> Self {
        Chip8State {
            settings,
            memory: Memory::new(),
            registers: RegisterBank::new(),
            pc: PC_START_ADDR,
            index: 0,
            stack: CallStack::new(),
            delay_timer: 0,
            sound_timer: 0,
            display: BitArray::ZERO,
            draw_flag: false,
            keypad: Keypad::new(),
        }
    }

    pub fn clear_display(&mut self) {
        self.display.fill(false);
        self.draw_flag = true;
    }

    /// XOR-draws `rows` sprite bytes from memory at the index register onto
    /// the display, returning whether any on-pixel was toggled off. The
    /// sprite data is bounds-checked before any pixel is touched.
    pub fn draw_sprite(&mut self, x: usize, y: usize, rows: u8) -> anyhow::Result<bool> {
        let mut collision = false;
        let sprite = self.memory.read_sprite(self.index, rows)?;

        for (row, &byte) in sprite.iter().enumerate() {
            let pixel_y = match self.settings.sprite_mode {
                SpriteMode::Wrap => (y + row) % DISPLAY_HEIGHT,
                SpriteMode::Clip => {
                    let pixel_y = y + row;
                    if pixel_y >= DISPLAY_HEIGHT {
                        continue;
                    }
                    pixel_y
                }
            };
            for bit in 0..8 {
                if (byte >> (7 - bit)) & 1 == 0 {
                    continue;
                }

                let pixel_x = (x + bit) % DISPLAY_WIDTH;
                let index = pixel_y * DISPLAY_WIDTH + pixel_x;
                if self.display[index] {
                    collision = true;
                }
                let current_pixel = self.display[index];
                self.display.set(index, !current_pixel);
            }
        }

        // The redraw flag is raised even when no pixel toggled.
        self.draw_flag = true;
        Ok(collision)
    }

    /// One 60 Hz tick: both timers count down independently and floor at
    /// zero.
    pub fn tick_timers(&mut self) {
        if self.delay_timer > 0 {
            self.delay_timer -= 1;
        }
        if self.sound_timer > 0 {
            self.sound_timer -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state(sprite_mode: SpriteMode) -> Chip8State {
        Chip8State::new(Settings::new(60, 1000, sprite_mode, PathBuf::from("test.ch8")))
    }

    #[test]
    fn test_font_is_loaded_at_address_zero() {
        let memory = Memory::new();
        // Glyph 0 starts at 0x000, glyph F at 5 * 0xF.
        assert_eq!(memory.read(FONT_ADDR).unwrap(), 0xF0);
        assert_eq!(memory.read(FONT_ADDR + 5 * 0xF).unwrap(), 0xF0);
        assert_eq!(memory.read(FONT_ADDR + 5 * 0xF + 4).unwrap(), 0x80);
    }

    #[test]
    fn test_rom_is_loaded_at_0x200() {
        let mut memory = Memory::new();
        memory.load_rom(&[0xAA, 0xBB]).unwrap();
        assert_eq!(memory.read(PC_START_ADDR).unwrap(), 0xAA);
        assert_eq!(memory.read(PC_START_ADDR + 1).unwrap(), 0xBB);
    }

    #[test]
    fn test_rom_fills_available_memory_but_no_more() {
        let mut memory = Memory::new();
        assert!(memory.load_rom(&vec![0; MEM_SIZE - PC_START_ADDR]).is_ok());
        assert!(memory
            .load_rom(&vec![0; MEM_SIZE - PC_START_ADDR + 1])
            .is_err());
    }

    #[test]
    fn test_memory_access_is_bounds_checked() {
        let mut memory = Memory::new();
        assert!(memory.read(MEM_SIZE - 1).is_ok());
        assert!(memory.read(MEM_SIZE).is_err());
        assert!(memory.write(MEM_SIZE, 0xFF).is_err());
        assert!(memory.read_sprite(MEM_SIZE - 2, 3).is_err());
    }

    #[test]
    fn test_call_stack_overflows_at_depth_16() {
        let mut stack = CallStack::new();
        for _ in 0..STACK_DEPTH {
            stack.push(0x200).unwrap();
        }
        assert!(stack.push(0x200).is_err());
    }

    #[test]
    fn test_call_stack_underflows_when_empty() {
        let mut stack = CallStack::new();
        assert!(stack.pop().is_err());

        stack.push(0x456).unwrap();
        assert_eq!(stack.pop().unwrap(), 0x456);
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_keypad_tracks_multiple_pressed_keys() {
        let mut keypad = Keypad::new();
        keypad.press(Key::Key5);
        keypad.press(Key::KeyA);
        assert!(keypad.is_pressed(0x5));
        assert!(keypad.is_pressed(0xA));
        assert!(!keypad.is_pressed(0x0));

        keypad.release(Key::Key5);
        assert!(!keypad.is_pressed(0x5));
        assert!(keypad.is_pressed(0xA));
    }

    #[test]
    fn test_keypad_never_reports_out_of_range_codes() {
        let keypad = Keypad::new();
        assert!(!keypad.is_pressed(0x10));
        assert!(!keypad.is_pressed(0xFF));
    }

    #[test]
    fn test_clear_display_turns_off_every_pixel() {
        let mut state = test_state(SpriteMode::Wrap);
        state.display.fill(true);
        state.clear_display();
        assert!(state.display.not_any());
        assert!(state.draw_flag);
    }

    #[test]
    fn test_draw_sprite_wraps_vertically_in_wrap_mode() {
        let mut state = test_state(SpriteMode::Wrap);
        state.index = 0x300;
        state.memory.write(0x300, 0x80).unwrap();
        state.memory.write(0x301, 0x80).unwrap();

        state.draw_sprite(0, DISPLAY_HEIGHT - 1, 2).unwrap();
        assert!(state.display[(DISPLAY_HEIGHT - 1) * DISPLAY_WIDTH]);
        assert!(state.display[0]); // second row wrapped to the top
    }

    #[test]
    fn test_draw_sprite_drops_overflow_rows_in_clip_mode() {
        let mut state = test_state(SpriteMode::Clip);
        state.index = 0x300;
        state.memory.write(0x300, 0x80).unwrap();
        state.memory.write(0x301, 0x80).unwrap();

        state.draw_sprite(0, DISPLAY_HEIGHT - 1, 2).unwrap();
        assert!(state.display[(DISPLAY_HEIGHT - 1) * DISPLAY_WIDTH]);
        assert!(!state.display[0]);
    }

    #[test]
    fn test_draw_sprite_wraps_horizontally() {
        let mut state = test_state(SpriteMode::Wrap);
        state.index = 0x300;
        state.memory.write(0x300, 0xC0).unwrap();

        state.draw_sprite(DISPLAY_WIDTH - 1, 0, 1).unwrap();
        assert!(state.display[DISPLAY_WIDTH - 1]);
        assert!(state.display[0]);
    }

    #[test]
    fn test_draw_sprite_raises_flag_even_without_toggles() {
        let mut state = test_state(SpriteMode::Wrap);
        state.index = 0x300; // all-zero sprite data
        state.draw_sprite(0, 0, 1).unwrap();
        assert!(state.display.not_any());
        assert!(state.draw_flag);
    }

    #[test]
    fn test_timers_count_down_to_zero_and_stay_there() {
        let mut state = test_state(SpriteMode::Wrap);
        state.sound_timer = 1;
        state.tick_timers();
        assert_eq!(state.sound_timer, 0);
        state.tick_timers();
        assert_eq!(state.sound_timer, 0);
    }

    #[test]
    fn test_timers_are_independent() {
        let mut state = test_state(SpriteMode::Wrap);
        state.delay_timer = 3;
        state.sound_timer = 1;
        state.tick_timers();
        state.tick_timers();
        assert_eq!(state.delay_timer, 1);
        assert_eq!(state.sound_timer, 0);
    }
}
