#![allow(dead_code)]

use std::io;

use trellis::{Engine, Result, UndefinedBehavior};

/// Renders an inline template with the given undefined behavior.
pub fn render_with(
    behavior: UndefinedBehavior,
    source: &str,
    ctx: impl serde::Serialize,
) -> Result<String> {
    let mut engine = Engine::new();
    engine.set_undefined_behavior(behavior);
    engine.compile(source)?.render(ctx)
}

/// A writer that fails after a number of writes.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
    count: usize,
    max: usize,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            count: 0,
            max: !0,
        }
    }

    pub fn with_max(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            count: 0,
            max,
        }
    }

    #[track_caller]
    pub fn into_string(self) -> String {
        String::from_utf8(self.buf).unwrap()
    }
}

impl io::Write for &mut Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += 1;
        if self.count > self.max {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
