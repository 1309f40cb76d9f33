use core::fmt::Write;

use sdfat::{Attributes, WalkEntry};

/// `R`ead-only, `H`idden, `S`ystem, `D`irectory, `A`rchive, in that order.
pub fn attribute_letters(attributes: Attributes) -> heapless::String<5> {
    const LETTERS: [(Attributes, char); 5] = [
        (Attributes::READ_ONLY, 'R'),
        (Attributes::HIDDEN, 'H'),
        (Attributes::SYSTEM, 'S'),
        (Attributes::DIRECTORY, 'D'),
        (Attributes::ARCHIVE, 'A'),
    ];
    let mut out = heapless::String::new();
    for (flag, letter) in LETTERS {
        if attributes.contains(flag) {
            let _ = out.push(letter);
        }
    }
    out
}

/// One `ls` line: the path relative to the listed directory, prefixed in
/// long mode by the size and attribute letters.
pub fn render_walk_entry(item: &WalkEntry<'_>, long: bool) -> String {
    let mut line = String::new();
    if long {
        let _ = write!(
            line,
            "{:>10} {} ",
            item.entry.size,
            attribute_letters(item.entry.attributes)
        );
    }
    let _ = item.write_path(&mut line);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_follow_fixed_order() {
        let attrs = Attributes::ARCHIVE | Attributes::READ_ONLY | Attributes::DIRECTORY;
        assert_eq!(attribute_letters(attrs).as_str(), "RDA");
        assert_eq!(attribute_letters(Attributes::empty()).as_str(), "");
    }
}
