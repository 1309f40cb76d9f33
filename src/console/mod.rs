mod commands;
mod line_reader;
mod listing;
mod parser;

use std::io::{self, Read, Write};

use sdfat::{BlockDevice, Clock, FatError, FileSystem};

use crate::config::{LINE_BUFFER_LEN, PROMPT};

pub use line_reader::{LineReadEvent, SerialLineReader};
pub use listing::{attribute_letters, render_walk_entry};
pub use parser::{parse_command, Command, ParseError};

/// Failure of a single console command.
#[derive(Debug)]
pub enum CommandError {
    Fat(FatError),
    Output(io::Error),
}

impl From<FatError> for CommandError {
    fn from(value: FatError) -> Self {
        Self::Fat(value)
    }
}

impl From<io::Error> for CommandError {
    fn from(value: io::Error) -> Self {
        Self::Output(value)
    }
}

/// Line-oriented shell over one mounted (or mountable) volume.
pub struct Console<D, C> {
    fs: FileSystem<D, C>,
    reader: SerialLineReader,
    echo: bool,
}

impl<D: BlockDevice, C: Clock> Console<D, C> {
    pub fn new(fs: FileSystem<D, C>) -> Self {
        Self {
            fs,
            reader: SerialLineReader::new(),
            echo: false,
        }
    }

    /// Echo typed bytes back, as a serial terminal without local echo needs.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn filesystem(&self) -> &FileSystem<D, C> {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut FileSystem<D, C> {
        &mut self.fs
    }

    pub fn into_filesystem(self) -> FileSystem<D, C> {
        self.fs
    }

    /// Mounts the volume and reports the outcome the way the board firmware
    /// does at boot.
    pub fn mount<W: Write>(&mut self, out: &mut W) -> io::Result<bool> {
        match self.fs.mount() {
            Ok(_) => {
                writeln!(out, "FAT-mount successful")?;
                Ok(true)
            }
            Err(err) => {
                writeln!(out, "FAT-mount failed: {}", err)?;
                Ok(false)
            }
        }
    }

    /// Parses and runs one command line. Command failures are printed; only
    /// output errors are returned.
    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<()> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(ParseError::Empty) => return Ok(()),
            Err(err) => return writeln!(out, "{}", err),
        };
        log::debug!("sdconsole: exec cmd={}", command);
        match self.dispatch(&command, out) {
            Ok(()) => Ok(()),
            Err(CommandError::Fat(err)) => {
                log::debug!("sdconsole: exec_error cmd={} err={:?}", command, err);
                writeln!(out, "{} failed: {}", command, err)
            }
            Err(CommandError::Output(err)) => Err(err),
        }
    }

    /// Feeds one input byte. Returns `true` once a line has been handled and
    /// a fresh prompt is due.
    pub fn feed<W: Write>(&mut self, byte: u8, out: &mut W) -> io::Result<bool> {
        let line = match self.reader.push_byte(byte) {
            LineReadEvent::None => return Ok(false),
            LineReadEvent::Stored(byte) => {
                if self.echo {
                    out.write_all(&[byte])?;
                }
                return Ok(false);
            }
            LineReadEvent::Erased => {
                if self.echo {
                    out.write_all(b"\x08 \x08")?;
                }
                return Ok(false);
            }
            LineReadEvent::Overflow => {
                writeln!(out, "\nline too long, max {} bytes", LINE_BUFFER_LEN)?;
                return Ok(true);
            }
            LineReadEvent::Complete(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        if self.echo {
            out.write_all(b"\n")?;
        }
        self.execute(&line, out)?;
        Ok(true)
    }

    /// Prompt, read, execute until `input` runs dry, then unmount so the
    /// allocation hints reach the disk.
    pub fn run<R: Read, W: Write>(&mut self, input: R, out: &mut W) -> io::Result<()> {
        out.write_all(PROMPT.as_bytes())?;
        out.flush()?;
        for byte in input.bytes() {
            if self.feed(byte?, out)? {
                out.write_all(PROMPT.as_bytes())?;
            }
            out.flush()?;
        }
        if self.fs.is_mounted() {
            if let Err(err) = self.fs.unmount() {
                log::warn!("sdconsole: exit unmount_error err={:?}", err);
            }
        }
        out.flush()
    }
}
