use core::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    List { long: bool, path: String },
    Remove { path: String },
    MakeDir { path: String },
    Cat { path: String },
    Move { old: String, new: String },
    Mount,
    Unmount,
    Write { path: String, text: String },
    Append { path: String, text: String },
    Stat { path: String },
    DiskFree,
}

/// Renders the command and its path arguments, as used in failure lines.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => f.write_str("h"),
            Self::List { long, path } => {
                f.write_str("ls")?;
                if *long {
                    f.write_str(" -l")?;
                }
                if !path.is_empty() {
                    write!(f, " {}", path)?;
                }
                Ok(())
            }
            Self::Remove { path } => write!(f, "rm {}", path),
            Self::MakeDir { path } => write!(f, "mkdir {}", path),
            Self::Cat { path } => write!(f, "cat {}", path),
            Self::Move { old, new } => write!(f, "mv {} {}", old, new),
            Self::Mount => f.write_str("mount"),
            Self::Unmount => f.write_str("umount"),
            Self::Write { path, .. } => write!(f, "write {}", path),
            Self::Append { path, .. } => write!(f, "append {}", path),
            Self::Stat { path } => write!(f, "stat {}", path),
            Self::DiskFree => f.write_str("df"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Usage(&'static str),
    Unknown(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Usage(usage) => write!(f, "usage: {}", usage),
            Self::Unknown(command) => write!(f, "Unknown command: {}, \"h\" for help.", command),
        }
    }
}

pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let Some((name, rest)) = split_token(line) else {
        return Err(ParseError::Empty);
    };
    let mut args = rest.split_ascii_whitespace();

    let command = match name {
        "h" | "help" => Command::Help,
        "ls" => {
            let mut long = false;
            let mut path = None;
            for arg in args.by_ref() {
                match arg {
                    "-l" if !long => long = true,
                    _ if path.is_none() && !arg.starts_with('-') => path = Some(arg.to_owned()),
                    _ => return Err(ParseError::Usage("ls [-l] [path]")),
                }
            }
            Command::List {
                long,
                path: path.unwrap_or_default(),
            }
        }
        "rm" => Command::Remove {
            path: single_arg(&mut args, "rm <file>")?,
        },
        "mkdir" => Command::MakeDir {
            path: single_arg(&mut args, "mkdir <dirname>")?,
        },
        "cat" => Command::Cat {
            path: single_arg(&mut args, "cat <file>")?,
        },
        "stat" => Command::Stat {
            path: single_arg(&mut args, "stat <path>")?,
        },
        "mv" => {
            let usage = "mv <old> <new>";
            let (Some(old), Some(new), None) = (args.next(), args.next(), args.next()) else {
                return Err(ParseError::Usage(usage));
            };
            Command::Move {
                old: old.to_owned(),
                new: new.to_owned(),
            }
        }
        "write" | "append" => {
            let usage = if name == "write" {
                "write <file> <text>"
            } else {
                "append <file> <text>"
            };
            let Some((path, text)) = split_token(rest) else {
                return Err(ParseError::Usage(usage));
            };
            let (path, text) = (path.to_owned(), text.to_owned());
            if name == "write" {
                Command::Write { path, text }
            } else {
                Command::Append { path, text }
            }
        }
        "mount" => no_args(&mut args, Command::Mount, "mount")?,
        "umount" => no_args(&mut args, Command::Unmount, "umount")?,
        "df" => no_args(&mut args, Command::DiskFree, "df")?,
        _ => return Err(ParseError::Unknown(name.to_owned())),
    };
    Ok(command)
}

/// First whitespace-separated token and the remainder with its leading
/// whitespace removed.
fn split_token(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    if line.is_empty() {
        return None;
    }
    match line.find(|c: char| c.is_ascii_whitespace()) {
        Some(end) => Some((&line[..end], line[end..].trim_start())),
        None => Some((line, "")),
    }
}

fn single_arg<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    usage: &'static str,
) -> Result<String, ParseError> {
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg.to_owned()),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn no_args<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    command: Command,
    usage: &'static str,
) -> Result<Command, ParseError> {
    match args.next() {
        None => Ok(command),
        Some(_) => Err(ParseError::Usage(usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ls_variants() {
        assert_eq!(
            parse_command("ls"),
            Ok(Command::List {
                long: false,
                path: String::new()
            })
        );
        assert_eq!(
            parse_command("  ls -l  /DIR1 "),
            Ok(Command::List {
                long: true,
                path: "/DIR1".to_owned()
            })
        );
        assert_eq!(
            parse_command("ls -x"),
            Err(ParseError::Usage("ls [-l] [path]"))
        );
    }

    #[test]
    fn parses_mv() {
        assert_eq!(
            parse_command("mv a.txt b.txt"),
            Ok(Command::Move {
                old: "a.txt".to_owned(),
                new: "b.txt".to_owned()
            })
        );
        assert_eq!(
            parse_command("mv a.txt"),
            Err(ParseError::Usage("mv <old> <new>"))
        );
    }

    #[test]
    fn write_keeps_payload_spacing() {
        assert_eq!(
            parse_command("write /notes/todo.txt buy  milk"),
            Ok(Command::Write {
                path: "/notes/todo.txt".to_owned(),
                text: "buy  milk".to_owned()
            })
        );
        assert_eq!(
            parse_command("append log.txt"),
            Ok(Command::Append {
                path: "log.txt".to_owned(),
                text: String::new()
            })
        );
        assert_eq!(
            parse_command("write"),
            Err(ParseError::Usage("write <file> <text>"))
        );
    }

    #[test]
    fn missing_arguments_report_usage() {
        assert_eq!(parse_command("rm"), Err(ParseError::Usage("rm <file>")));
        assert_eq!(
            parse_command("mkdir"),
            Err(ParseError::Usage("mkdir <dirname>"))
        );
        assert_eq!(parse_command("cat a b"), Err(ParseError::Usage("cat <file>")));
        assert_eq!(parse_command("df now"), Err(ParseError::Usage("df")));
    }

    #[test]
    fn unknown_and_empty_lines() {
        assert_eq!(parse_command("   "), Err(ParseError::Empty));
        let err = parse_command("format").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown command: format, \"h\" for help."
        );
    }

    #[test]
    fn display_omits_payload() {
        let cmd = parse_command("append /LOG.TXT hello").unwrap();
        assert_eq!(cmd.to_string(), "append /LOG.TXT");
        let cmd = parse_command("ls -l /A").unwrap();
        assert_eq!(cmd.to_string(), "ls -l /A");
    }
}
