/// A constant value in a function's constant table.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    /// Signed 64-bit cdata literal (`123LL`).
    Int64(i64),
    /// Unsigned 64-bit cdata literal (`123ULL`). Engine hashes are stored this way.
    UInt64(u64),
    /// Imaginary cdata literal (`re + im i`).
    Complex(f64, f64),
    /// Template for `TDUP`-style table construction.
    Table(TableTemplate),
}

/// A constant table template: array part followed by hash part.
///
/// `array[0]` is the `t[0]` slot. LuaJIT stores it even though source-level
/// constructors start at index 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableTemplate {
    pub array: Vec<Constant>,
    pub hash: Vec<(Constant, Constant)>,
}

impl Constant {
    /// The string payload, if this is a string constant.
    pub fn as_str(&self) -> Option<&[u8]> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    /// Lossy UTF-8 view of a string constant.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_str().map(|s| String::from_utf8_lossy(s).into_owned())
    }

    /// True for the 64-bit integer cdata constants that may carry a hash.
    pub fn is_hash_like(&self) -> bool {
        matches!(self, Constant::Int64(_) | Constant::UInt64(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_like_constants() {
        assert!(Constant::UInt64(0xDEAD_BEEF).is_hash_like());
        assert!(Constant::Int64(-1).is_hash_like());
        assert!(!Constant::Integer(7).is_hash_like());
        assert!(!Constant::String(b"x".to_vec()).is_hash_like());
    }

    #[test]
    fn string_views() {
        let k = Constant::String(b"print".to_vec());
        assert_eq!(k.as_str(), Some(&b"print"[..]));
        assert_eq!(k.to_string_lossy().as_deref(), Some("print"));
        assert_eq!(Constant::Nil.as_str(), None);
    }
}
