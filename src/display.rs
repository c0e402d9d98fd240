//! Where rendered frames go: a desktop window or nowhere.

use anyhow::{anyhow, Result};
use image::RgbImage;
use minifb::{Key, KeyRepeat, ScaleMode, Window, WindowOptions};

/// Input gathered since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInput {
    None,
    Quit,
    Screenshot,
    /// The surface was closed by the window manager.
    Closed,
}

pub trait Display {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;

    /// Poll for user input without blocking longer than one frame.
    fn poll(&mut self) -> UserInput;

    /// Whether a person is watching and can send input.
    fn is_interactive(&self) -> bool;
}

impl<T: Display + ?Sized> Display for Box<T> {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).show(frame)
    }

    fn poll(&mut self) -> UserInput {
        (**self).poll()
    }

    fn is_interactive(&self) -> bool {
        (**self).is_interactive()
    }
}

/// Resizable desktop window. `Q`/`Esc` quits, `S` requests a screenshot.
pub struct WindowDisplay {
    window: Window,
    buffer: Vec<u32>,
}

impl WindowDisplay {
    pub fn open(title: &str, width: usize, height: usize, fps: usize) -> Result<Self> {
        let mut window = Window::new(
            title,
            width.max(1),
            height.max(1),
            WindowOptions {
                resize: true,
                scale_mode: ScaleMode::AspectRatioStretch,
                ..WindowOptions::default()
            },
        )
        .map_err(|e| anyhow!("cannot open window: {}", e))?;
        window.set_target_fps(fps);
        Ok(Self {
            window,
            buffer: Vec::new(),
        })
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        pack_rgb(frame, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, frame.width() as usize, frame.height() as usize)
            .map_err(|e| anyhow!("cannot update window: {}", e))
    }

    fn poll(&mut self) -> UserInput {
        if !self.window.is_open() {
            return UserInput::Closed;
        }
        if self.window.is_key_down(Key::Escape) || self.window.is_key_pressed(Key::Q, KeyRepeat::No) {
            return UserInput::Quit;
        }
        if self.window.is_key_pressed(Key::S, KeyRepeat::No) {
            return UserInput::Screenshot;
        }
        UserInput::None
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Discards frames but keeps the last one, for batch runs and tests.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    last: Option<RgbImage>,
    shown: usize,
}

impl HeadlessDisplay {
    pub fn last_frame(&self) -> Option<&RgbImage> {
        self.last.as_ref()
    }

    pub fn frames_shown(&self) -> usize {
        self.shown
    }
}

impl Display for HeadlessDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        self.last = Some(frame.clone());
        self.shown += 1;
        Ok(())
    }

    fn poll(&mut self) -> UserInput {
        UserInput::None
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// `0RGB` pixels as minifb expects them.
fn pack_rgb(frame: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        frame
            .pixels()
            .map(|p| (p.0[0] as u32) << 16 | (p.0[1] as u32) << 8 | p.0[2] as u32),
    );
}
