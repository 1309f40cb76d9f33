use std::io::Write;

use sdfat::{BlockDevice, Clock, FatError, FileHandle, OpenMode};

use super::{listing, Command, CommandError, Console};
use crate::config::CAT_CHUNK_LEN;

const HELP: [(&str, &str); 12] = [
    ("h", "help"),
    ("ls [-l] [path]", "list files"),
    ("rm <file>", "remove file"),
    ("mkdir <dirname>", "create dir"),
    ("cat <file>", "display file"),
    ("mv <old> <new>", "rename file"),
    ("mount", "mount file system"),
    ("umount", "unmount file system"),
    ("write <file> <text>", "replace file with a line"),
    ("append <file> <text>", "add a line to file"),
    ("stat <path>", "show entry details"),
    ("df", "show volume usage"),
];

const RULE: &str = "-----------------------------------------";

type CommandResult = Result<(), CommandError>;

impl<D: BlockDevice, C: Clock> Console<D, C> {
    pub(super) fn dispatch<W: Write>(&mut self, command: &Command, out: &mut W) -> CommandResult {
        match command {
            Command::Help => return help(out),
            Command::Mount => {
                self.mount(out)?;
                return Ok(());
            }
            Command::Unmount => return Ok(self.fs.unmount()?),
            _ => {}
        }
        if !self.fs.is_mounted() {
            return Err(FatError::NotMounted.into());
        }

        match command {
            Command::List { long, path } => self.list(path, *long, out),
            Command::Remove { path } => Ok(self.fs.remove_path(path)?),
            Command::MakeDir { path } => {
                self.fs.create_dir(path)?;
                Ok(())
            }
            Command::Cat { path } => self.cat(path, out),
            Command::Move { old, new } => {
                self.fs.rename_path(old, new)?;
                Ok(())
            }
            Command::Write { path, text } => self.put_line(path, text, false),
            Command::Append { path, text } => self.put_line(path, text, true),
            Command::Stat { path } => self.stat(path, out),
            Command::DiskFree => self.disk_free(out),
            Command::Help | Command::Mount | Command::Unmount => Ok(()),
        }
    }

    fn list<W: Write>(&mut self, path: &str, long: bool, out: &mut W) -> CommandResult {
        let mut written = Ok(());
        self.fs.walk(path, |item| {
            if written.is_ok() {
                written = writeln!(out, "{}", listing::render_walk_entry(item, long));
            }
        })?;
        Ok(written?)
    }

    fn cat<W: Write>(&mut self, path: &str, out: &mut W) -> CommandResult {
        let mut handle = self.fs.open_path(path, OpenMode::Read)?;
        writeln!(out, "Content of file {}", path)?;
        writeln!(out, "{}", RULE)?;

        let mut chunk = [0u8; CAT_CHUNK_LEN];
        let mut last = b'\n';
        loop {
            let n = self.fs.read(&mut handle, &mut chunk)?;
            if n == 0 {
                break;
            }
            out.write_all(&chunk[..n])?;
            last = chunk[n - 1];
        }
        if last != b'\n' {
            out.write_all(b"\n")?;
        }
        Ok(self.fs.close(handle)?)
    }

    /// Writes `text` plus a newline, replacing the file or appending to it.
    /// The file is created when missing.
    fn put_line(&mut self, path: &str, text: &str, append: bool) -> CommandResult {
        let mut handle = match self.fs.open_path(path, OpenMode::Write) {
            Ok(handle) => handle,
            Err(FatError::NotFound) => self.fs.open_path(path, OpenMode::Create)?,
            Err(err) => return Err(err.into()),
        };
        let written = self.fill(&mut handle, text, append);
        let closed = self.fs.close(handle);
        written?;
        Ok(closed?)
    }

    fn fill(&mut self, handle: &mut FileHandle, text: &str, append: bool) -> Result<(), FatError> {
        if append {
            let end = handle.len();
            self.fs.seek(handle, end)?;
        } else {
            self.fs.truncate(handle)?;
        }
        self.fs.write(handle, text.as_bytes())?;
        self.fs.write(handle, b"\n")?;
        Ok(())
    }

    fn stat<W: Write>(&mut self, path: &str, out: &mut W) -> CommandResult {
        let entry = self.fs.resolve(path)?;
        if entry.is_root() {
            writeln!(out, "name: /")?;
        } else {
            writeln!(out, "name: {}", entry.name)?;
        }
        writeln!(out, "type: {}", if entry.is_dir() { "dir" } else { "file" })?;
        writeln!(out, "size: {}", entry.size)?;
        writeln!(out, "attributes: {}", listing::attribute_letters(entry.attributes))?;
        writeln!(out, "cluster: {}", entry.first_cluster)?;
        if !entry.is_root() {
            writeln!(out, "created: {}", entry.created)?;
            writeln!(out, "modified: {}", entry.modified)?;
        }
        Ok(())
    }

    fn disk_free<W: Write>(&mut self, out: &mut W) -> CommandResult {
        let free = self.fs.free_cluster_count()?;
        let volume = *self.fs.volume().ok_or(FatError::NotMounted)?;
        let state = *self.fs.mount_state().ok_or(FatError::NotMounted)?;

        writeln!(out, "type: FAT{}", volume.fat_type.bits())?;
        writeln!(out, "label: {}", volume.label_str())?;
        writeln!(out, "cluster size: {} bytes", volume.cluster_size())?;
        writeln!(out, "clusters: {} total, {} free", volume.cluster_count, free)?;
        writeln!(
            out,
            "bytes: {} total, {} free",
            volume.total_bytes(),
            free as u64 * volume.cluster_size() as u64
        )?;
        if state.fats_diverged {
            writeln!(out, "warning: FAT copies diverged")?;
        }
        if state.needs_repair {
            writeln!(out, "warning: volume needs repair")?;
        }
        Ok(())
    }
}

fn help<W: Write>(out: &mut W) -> CommandResult {
    for (usage, text) in HELP {
        writeln!(out, "{:<20} - {}", usage, text)?;
    }
    Ok(())
}
