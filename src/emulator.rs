use std::sync::mpsc;
use std::time::{Duration, Instant};

use crossterm::{
    event,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use rodio::{source::SineWave, OutputStream, Sink, Source};

use crate::chip8::Chip8;
use crate::state::{FrameBuffer, Key, Settings, DISPLAY_HEIGHT, DISPLAY_WIDTH};

const DEFAULT_FREQUENCY: f32 = 440.0;

pub struct Beep {
    sink: Sink,
    #[allow(dead_code)]
    stream: OutputStream,
}

impl Beep {
    pub fn new(freq: f32) -> anyhow::Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()?;
        let sink = Sink::try_new(&stream_handle)?;
        let source = SineWave::new(freq).repeat_infinite();

        sink.append(source);
        sink.pause();

        Ok(Self { sink, stream })
    }

    pub fn on(&mut self) {
        self.sink.play();
    }

    pub fn off(&mut self) {
        self.sink.pause();
    }
}

enum InputEvent {
    Pressed(Key),
    Released(Key),
    Quit,
}

/// Original COSMAC layout on the left half of a QWERTY keyboard.
fn map_key(key: rdev::Key) -> Option<Key> {
    match key {
        rdev::Key::Num1 => Some(Key::Key1),
        rdev::Key::Num2 => Some(Key::Key2),
        rdev::Key::Num3 => Some(Key::Key3),
        rdev::Key::Num4 => Some(Key::KeyC),
        rdev::Key::KeyQ => Some(Key::Key4),
        rdev::Key::KeyW => Some(Key::Key5),
        rdev::Key::KeyE => Some(Key::Key6),
        rdev::Key::KeyR => Some(Key::KeyD),
        rdev::Key::KeyA => Some(Key::Key7),
        rdev::Key::KeyS => Some(Key::Key8),
        rdev::Key::KeyD => Some(Key::Key9),
        rdev::Key::KeyF => Some(Key::KeyE),
        rdev::Key::KeyZ => Some(Key::KeyA),
        rdev::Key::KeyX => Some(Key::Key0),
        rdev::Key::KeyC => Some(Key::KeyB),
        rdev::Key::KeyV => Some(Key::KeyF),
        _ => None,
    }
}

/// Listens for global key transitions on a dedicated thread. Crossterm's
/// terminal events carry no key-release information, which the keypad's
/// pressed-set needs.
fn spawn_input_listener() -> mpsc::Receiver<InputEvent> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = rdev::listen(move |event| {
            let message = match event.event_type {
                rdev::EventType::KeyPress(rdev::Key::Escape) => Some(InputEvent::Quit),
                rdev::EventType::KeyPress(key) => map_key(key).map(InputEvent::Pressed),
                rdev::EventType::KeyRelease(key) => map_key(key).map(InputEvent::Released),
                _ => None,
            };
            if let Some(message) = message {
                let _ = tx.send(message);
            }
        });
        if let Err(err) = result {
            log::error!("Input listener failed: {:?}", err);
        }
    });
    rx
}

/// Drives one machine from a single thread: each frame drains pending key
/// transitions, runs a batch of instruction cycles, ticks the timers,
/// switches the beeper, and redraws when the framebuffer changed.
pub struct Emulator {
    chip8: Chip8,
    beeper: Option<Beep>,
    fault: Option<anyhow::Error>,
}

impl Emulator {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let rom = std::fs::read(&settings.rom)?;
        let chip8 = Chip8::new(settings, &rom)?;
        let beeper = match Beep::new(DEFAULT_FREQUENCY) {
            Ok(beeper) => Some(beeper),
            Err(err) => {
                log::warn!("Audio unavailable, running silent: {err:#}");
                None
            }
        };

        Ok(Emulator {
            chip8,
            beeper,
            fault: None,
        })
    }

    /// Runs up to `cycles` instruction cycles followed by one timer tick.
    /// The first fatal cycle error is latched: no further cycles run, but
    /// timers keep decrementing so the last frame stays on screen.
    fn advance_frame(&mut self, cycles: u64) {
        if self.fault.is_none() {
            for _ in 0..cycles {
                if let Err(err) = self.chip8.step() {
                    log::error!("Emulation halted: {err:#}");
                    self.fault = Some(err);
                    break;
                }
            }
        }
        self.chip8.tick_timers();
    }

    fn render(frame: &mut ratatui::Frame, buffer: &FrameBuffer, rom_name: &str) {
        // Exact size for the 64x32 display plus its borders
        let game_width = (DISPLAY_WIDTH as u16) + 2;
        let game_height = (DISPLAY_HEIGHT as u16) + 2;

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(game_height),
                Constraint::Length(7),
                Constraint::Min(0),
            ])
            .split(frame.area());

        let game_area = if chunks[0].width > game_width {
            let horizontal_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([
                    Constraint::Min(0),
                    Constraint::Length(game_width),
                    Constraint::Min(0),
                ])
                .split(chunks[0]);
            horizontal_chunks[1]
        } else {
            chunks[0]
        };

        let mut row_string = String::with_capacity(DISPLAY_WIDTH * DISPLAY_HEIGHT + DISPLAY_HEIGHT);
        for row_idx in 0..DISPLAY_HEIGHT {
            for col_idx in 0..DISPLAY_WIDTH {
                let index = row_idx * DISPLAY_WIDTH + col_idx;
                row_string.push(if buffer[index] { '█' } else { ' ' });
            }
            row_string.push('\n');
        }
        let game_paragraph = Paragraph::new(row_string)
            .block(Block::default().borders(Borders::ALL).title(rom_name))
            .style(Style::default().fg(Color::White));
        frame.render_widget(game_paragraph, game_area);

        let key_mapping = "Key Mapping:\n\
    1 2 3 4    →    1 2 3 C\n\
    Q W E R    →    4 5 6 D\n\
    A S D F    →    7 8 9 E\n\
    Z X C V    →    A 0 B F";
        let key_paragraph = Paragraph::new(key_mapping)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Keypad"))
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(key_paragraph, chunks[1]);
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        let frame_duration =
            Duration::from_secs_f64(1.0 / self.chip8.settings().frame_rate as f64);
        let cycles_per_frame =
            (self.chip8.settings().ips / self.chip8.settings().frame_rate).max(1);
        let rom_stem: String = self
            .chip8
            .settings()
            .rom
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Unknown ROM".to_string());

        let input = spawn_input_listener();

        enable_raw_mode()?;
        let stdout = std::io::stdout();
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        'mainloop: loop {
            let frame_start = Instant::now();

            // Key transitions apply between frames, never mid-cycle
            while let Ok(event) = input.try_recv() {
                match event {
                    InputEvent::Pressed(key) => self.chip8.key_press(key),
                    InputEvent::Released(key) => self.chip8.key_release(key),
                    InputEvent::Quit => {
                        terminal.clear()?;
                        break 'mainloop;
                    }
                }
            }

            // Consume and discard any crossterm events to prevent echoing
            while event::poll(Duration::ZERO)? {
                let _ = event::read()?;
            }

            self.advance_frame(cycles_per_frame);

            if let Some(beeper) = &mut self.beeper {
                if self.chip8.sound_active() {
                    beeper.on();
                } else {
                    beeper.off();
                }
            }

            if let Some(buffer) = self.chip8.take_frame() {
                terminal.draw(|frame| Self::render(frame, &buffer, &rom_stem))?;
            }

            let elapsed = frame_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
        disable_raw_mode()?;

        Ok(())
    }
}
