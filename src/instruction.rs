use crate::state::{
    Address, Chip8State, Register, DISPLAY_HEIGHT, DISPLAY_WIDTH, FONT_ADDR, FONT_HEIGHT,
};

fn addr12(raw: u16) -> Address {
    (raw & 0x0FFF) as Address
}

fn byte8(raw: u16) -> u8 {
    (raw & 0x00FF) as u8
}

fn reg_x(raw: u16) -> usize {
    ((raw & 0x0F00) >> 8) as usize
}

fn reg_y(raw: u16) -> usize {
    ((raw & 0x00F0) >> 4) as usize
}

fn nibble4(raw: u16) -> u8 {
    (raw & 0x000F) as u8
}

/// One decoded CHIP-8 operation with its operand fields extracted.
///
/// Decoding is total: sub-opcode slots the instruction set leaves unused
/// (including FX0A) become `Unimplemented` so execution can skip them
/// instead of halting the machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// 00E0
    ClearScreen,
    /// 00EE
    Return,
    /// 1NNN
    Jump { addr: Address },
    /// 2NNN
    Call { addr: Address },
    /// 3XKK
    SkipEqImm { x: usize, byte: u8 },
    /// 4XKK
    SkipNeImm { x: usize, byte: u8 },
    /// 5XY0
    SkipEqReg { x: usize, y: usize },
    /// 9XY0
    SkipNeReg { x: usize, y: usize },
    /// 6XKK
    LoadImm { x: usize, byte: u8 },
    /// 7XKK, wrapping add with no flag output
    AddImm { x: usize, byte: u8 },
    /// 8XY0
    Move { x: usize, y: usize },
    /// 8XY1
    Or { x: usize, y: usize },
    /// 8XY2
    And { x: usize, y: usize },
    /// 8XY3
    Xor { x: usize, y: usize },
    /// 8XY4, VF = carry
    Add { x: usize, y: usize },
    /// 8XY5, VF = 1 when VX > VY
    Sub { x: usize, y: usize },
    /// 8XY6, VF = bit 0 of VX before the shift
    ShiftRight { x: usize },
    /// 8XY7, VF = 1 when VY > VX
    SubReverse { x: usize, y: usize },
    /// 8XYE, VF = bit 7 of VX before the shift
    ShiftLeft { x: usize },
    /// ANNN
    LoadIndex { addr: Address },
    /// BNNN
    JumpOffset { addr: Address },
    /// CXKK
    Random { x: usize, byte: u8 },
    /// DXYN
    Draw { x: usize, y: usize, rows: u8 },
    /// EX9E
    SkipKeyPressed { x: usize },
    /// EXA1
    SkipKeyNotPressed { x: usize },
    /// FX07
    ReadDelay { x: usize },
    /// FX15
    SetDelay { x: usize },
    /// FX18
    SetSound { x: usize },
    /// FX1E, no clamp when the sum exceeds 12 bits
    AddIndex { x: usize },
    /// FX29
    FontAddress { x: usize },
    /// FX33
    StoreBcd { x: usize },
    /// FX55, index register left unchanged
    StoreRegisters { x: usize },
    /// FX65, index register left unchanged
    LoadRegisters { x: usize },
    /// Anything not in the instruction set; executes as a no-op
    Unimplemented { raw: u16 },
}

pub fn decode(raw: u16) -> Opcode {
    let x = reg_x(raw);
    let y = reg_y(raw);

    match raw >> 12 {
        0x0 => match byte8(raw) {
            0xE0 => Opcode::ClearScreen,
            0xEE => Opcode::Return,
            _ => Opcode::Unimplemented { raw },
        },
        0x1 => Opcode::Jump { addr: addr12(raw) },
        0x2 => Opcode::Call { addr: addr12(raw) },
        0x3 => Opcode::SkipEqImm { x, byte: byte8(raw) },
        0x4 => Opcode::SkipNeImm { x, byte: byte8(raw) },
        0x5 => Opcode::SkipEqReg { x, y },
        0x6 => Opcode::LoadImm { x, byte: byte8(raw) },
        0x7 => Opcode::AddImm { x, byte: byte8(raw) },
        0x8 => match nibble4(raw) {
            0x0 => Opcode::Move { x, y },
            0x1 => Opcode::Or { x, y },
            0x2 => Opcode::And { x, y },
            0x3 => Opcode::Xor { x, y },
            0x4 => Opcode::Add { x, y },
            0x5 => Opcode::Sub { x, y },
            0x6 => Opcode::ShiftRight { x },
            0x7 => Opcode::SubReverse { x, y },
            0xE => Opcode::ShiftLeft { x },
            _ => Opcode::Unimplemented { raw },
        },
        0x9 => Opcode::SkipNeReg { x, y },
        0xA => Opcode::LoadIndex { addr: addr12(raw) },
        0xB => Opcode::JumpOffset { addr: addr12(raw) },
        0xC => Opcode::Random { x, byte: byte8(raw) },
        0xD => Opcode::Draw {
            x,
            y,
            rows: nibble4(raw),
        },
        0xE => match byte8(raw) {
            0x9E => Opcode::SkipKeyPressed { x },
            0xA1 => Opcode::SkipKeyNotPressed { x },
            _ => Opcode::Unimplemented { raw },
        },
        0xF => match byte8(raw) {
            0x07 => Opcode::ReadDelay { x },
            0x15 => Opcode::SetDelay { x },
            0x18 => Opcode::SetSound { x },
            0x1E => Opcode::AddIndex { x },
            0x29 => Opcode::FontAddress { x },
            0x33 => Opcode::StoreBcd { x },
            0x55 => Opcode::StoreRegisters { x },
            0x65 => Opcode::LoadRegisters { x },
            _ => Opcode::Unimplemented { raw },
        },
        _ => unreachable!("top nibble is four bits"),
    }
}

/// Executes one decoded operation against machine state. The program
/// counter has already been advanced past the instruction by fetch, so
/// skips add another 2 and subroutine calls push the post-advance address.
///
/// ALU flag outputs are computed from the operand values read before the
/// result is stored; the flag write happens last so it wins when VF itself
/// is the destination register.
pub fn execute(opcode: Opcode, state: &mut Chip8State) -> anyhow::Result<()> {
    match opcode {
        Opcode::ClearScreen => {
            state.clear_display();
        }
        Opcode::Return => {
            state.pc = state.stack.pop()?;
        }
        Opcode::Jump { addr } => {
            state.pc = addr;
        }
        Opcode::Call { addr } => {
            state.stack.push(state.pc)?;
            state.pc = addr;
        }
        Opcode::SkipEqImm { x, byte } => {
            let reg_x = Register::from_index(x)?;
            if state.registers.read(reg_x) == byte {
                state.pc += 2;
            }
        }
        Opcode::SkipNeImm { x, byte } => {
            let reg_x = Register::from_index(x)?;
            if state.registers.read(reg_x) != byte {
                state.pc += 2;
            }
        }
        Opcode::SkipEqReg { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            if state.registers.read(reg_x) == state.registers.read(reg_y) {
                state.pc += 2;
            }
        }
        Opcode::SkipNeReg { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            if state.registers.read(reg_x) != state.registers.read(reg_y) {
                state.pc += 2;
            }
        }
        Opcode::LoadImm { x, byte } => {
            let reg_x = Register::from_index(x)?;
            state.registers.write(reg_x, byte);
        }
        Opcode::AddImm { x, byte } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            state.registers.write(reg_x, value_x.wrapping_add(byte));
        }
        Opcode::Move { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let value_y = state.registers.read(reg_y);
            state.registers.write(reg_x, value_y);
        }
        Opcode::Or { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let result = state.registers.read(reg_x) | state.registers.read(reg_y);
            state.registers.write(reg_x, result);
        }
        Opcode::And { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let result = state.registers.read(reg_x) & state.registers.read(reg_y);
            state.registers.write(reg_x, result);
        }
        Opcode::Xor { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let result = state.registers.read(reg_x) ^ state.registers.read(reg_y);
            state.registers.write(reg_x, result);
        }
        Opcode::Add { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let value_x = state.registers.read(reg_x);
            let value_y = state.registers.read(reg_y);
            let carry = u16::from(value_x) + u16::from(value_y) > 0xFF;

            state.registers.write(reg_x, value_x.wrapping_add(value_y));
            state.registers.write(Register::VF, u8::from(carry));
        }
        Opcode::Sub { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let value_x = state.registers.read(reg_x);
            let value_y = state.registers.read(reg_y);
            let no_borrow = value_x > value_y;

            state.registers.write(reg_x, value_x.wrapping_sub(value_y));
            state.registers.write(Register::VF, u8::from(no_borrow));
        }
        Opcode::ShiftRight { x } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            let low_bit = value_x & 0x01;

            state.registers.write(reg_x, value_x >> 1);
            state.registers.write(Register::VF, low_bit);
        }
        Opcode::SubReverse { x, y } => {
            let reg_x = Register::from_index(x)?;
            let reg_y = Register::from_index(y)?;
            let value_x = state.registers.read(reg_x);
            let value_y = state.registers.read(reg_y);
            let no_borrow = value_y > value_x;

            state.registers.write(reg_x, value_y.wrapping_sub(value_x));
            state.registers.write(Register::VF, u8::from(no_borrow));
        }
        Opcode::ShiftLeft { x } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            let high_bit = (value_x & 0x80) >> 7;

            state.registers.write(reg_x, value_x << 1);
            state.registers.write(Register::VF, high_bit);
        }
        Opcode::LoadIndex { addr } => {
            state.index = addr;
        }
        Opcode::JumpOffset { addr } => {
            state.pc = usize::from(state.registers.read(Register::V0)) + addr;
        }
        Opcode::Random { x, byte } => {
            let reg_x = Register::from_index(x)?;
            state.registers.write(reg_x, rand::random::<u8>() & byte);
        }
        Opcode::Draw { x, y, rows } => {
            let value_x = state.registers.read(Register::from_index(x)?);
            let value_y = state.registers.read(Register::from_index(y)?);
            let collision = state.draw_sprite(
                usize::from(value_x) % DISPLAY_WIDTH,
                usize::from(value_y) % DISPLAY_HEIGHT,
                rows,
            )?;
            state.registers.write(Register::VF, u8::from(collision));
        }
        Opcode::SkipKeyPressed { x } => {
            let reg_x = Register::from_index(x)?;
            if state.keypad.is_pressed(state.registers.read(reg_x)) {
                state.pc += 2;
            }
        }
        Opcode::SkipKeyNotPressed { x } => {
            let reg_x = Register::from_index(x)?;
            if !state.keypad.is_pressed(state.registers.read(reg_x)) {
                state.pc += 2;
            }
        }
        Opcode::ReadDelay { x } => {
            let reg_x = Register::from_index(x)?;
            state.registers.write(reg_x, state.delay_timer);
        }
        Opcode::SetDelay { x } => {
            let reg_x = Register::from_index(x)?;
            state.delay_timer = state.registers.read(reg_x);
        }
        Opcode::SetSound { x } => {
            let reg_x = Register::from_index(x)?;
            state.sound_timer = state.registers.read(reg_x);
        }
        Opcode::AddIndex { x } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            state.index = state.index.wrapping_add(usize::from(value_x));
        }
        Opcode::FontAddress { x } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            state.index = FONT_ADDR + usize::from(value_x) * FONT_HEIGHT;
        }
        Opcode::StoreBcd { x } => {
            let reg_x = Register::from_index(x)?;
            let value_x = state.registers.read(reg_x);
            state.memory.write(state.index, value_x / 100)?;
            state.memory.write(state.index + 1, (value_x / 10) % 10)?;
            state.memory.write(state.index + 2, value_x % 10)?;
        }
        Opcode::StoreRegisters { x } => {
            for i in 0..=x {
                let value = state.registers.read(Register::from_index(i)?);
                state.memory.write(state.index + i, value)?;
            }
        }
        Opcode::LoadRegisters { x } => {
            for i in 0..=x {
                let value = state.memory.read(state.index + i)?;
                state.registers.write(Register::from_index(i)?, value);
            }
        }
        Opcode::Unimplemented { raw } => {
            log::warn!("Skipping unimplemented opcode: {:#06X}", raw);
        }
    }
    Ok(())
}
