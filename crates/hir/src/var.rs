/// A register access, tagged with the pc of the instruction that performs
/// it. Naming looks up debug scopes with this pc, so two accesses to the same
/// slot can resolve to different locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegRef {
    pub register: u8,
    pub pc: usize,
}

impl RegRef {
    pub fn new(register: u8, pc: usize) -> Self {
        Self { register, pc }
    }
}

/// Reserved words of Lua 5.1.
pub fn is_lua_keyword(s: &str) -> bool {
    matches!(
        s,
        "and"
            | "break"
            | "do"
            | "else"
            | "elseif"
            | "end"
            | "false"
            | "for"
            | "function"
            | "if"
            | "in"
            | "local"
            | "nil"
            | "not"
            | "or"
            | "repeat"
            | "return"
            | "then"
            | "true"
            | "until"
            | "while"
            | "goto"
    )
}

/// True if `s` can be written as a bare name (`t.s`, `local s`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) && !is_lua_keyword(s)
}

/// Turn a debug name into a usable local name.
///
/// Keywords get a leading underscore; anything else that is not an
/// identifier has its offending characters replaced.
pub fn escape_identifier(name: &str) -> String {
    if is_lua_keyword(name) {
        return format!("_{name}");
    }
    if is_identifier(name) {
        return name.to_string();
    }
    let mut out: String = name
        .chars()
        .map(|c| if c == '_' || c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("foo_1"));
        assert!(is_identifier("_"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("end"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_identifier("end"), "_end");
        assert_eq!(escape_identifier("name"), "name");
        assert_eq!(escape_identifier("a b"), "a_b");
        assert_eq!(escape_identifier("9lives"), "_9lives");
        assert_eq!(escape_identifier(""), "_");
    }
}
