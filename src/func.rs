//! Operator identifiers for the three closure families, and the
//! opcode table mapping wire-level opcodes to operators.

use anyhow::anyhow;
use std::convert::TryFrom;
use std::fmt;

/// Binary-reducer family operators (plus the two stateless specials,
/// `BLLEVAL` and `QUOTE`). Stored as a u16 in `FUNC` chunks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Func {
    /// The meta-evaluator. Internal only; has no opcode.
    BllEval = 0,
    Quote,
    Partial,
    X,
    Rc,
    NotAll,
    All,
    Any,
    LtStr,
    StrLen,
    Cat,
    Add,
}

/// Fixed-arity family operators. Stored as a u16 in `FUNC_COUNT`
/// chunks, next to the argument counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FuncCount {
    Apply = 0,
    If,
    Head,
    Tail,
    List,
    SubStr,
}

/// Extended-state family operators: closures whose working state lives
/// outside the value graph. Stored as a u8 in `FUNC_EXT` chunks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FuncExt {
    Sha256 = 0,
}

impl Func {
    pub const fn name(self) -> &'static str {
        match self {
            Func::BllEval => "BLLEVAL",
            Func::Quote => "QUOTE",
            Func::Partial => "PARTIAL",
            Func::X => "X",
            Func::Rc => "RC",
            Func::NotAll => "NOTALL",
            Func::All => "ALL",
            Func::Any => "ANY",
            Func::LtStr => "LT_STR",
            Func::StrLen => "STRLEN",
            Func::Cat => "CAT",
            Func::Add => "ADD",
        }
    }
}

impl FuncCount {
    pub const fn name(self) -> &'static str {
        match self {
            FuncCount::Apply => "APPLY",
            FuncCount::If => "IF",
            FuncCount::Head => "HEAD",
            FuncCount::Tail => "TAIL",
            FuncCount::List => "LIST",
            FuncCount::SubStr => "SUBSTR",
        }
    }
}

impl FuncExt {
    pub const fn name(self) -> &'static str {
        match self {
            FuncExt::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for FuncCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for FuncExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<Func> for u16 {
    fn from(val: Func) -> Self {
        val as u16
    }
}

impl From<FuncCount> for u16 {
    fn from(val: FuncCount) -> Self {
        val as u16
    }
}

impl From<FuncExt> for u8 {
    fn from(val: FuncExt) -> Self {
        val as u8
    }
}

impl TryFrom<u16> for Func {
    type Error = anyhow::Error;

    fn try_from(x: u16) -> Result<Self, anyhow::Error> {
        match x {
            f if f == Func::BllEval as u16 => Ok(Func::BllEval),
            f if f == Func::Quote as u16 => Ok(Func::Quote),
            f if f == Func::Partial as u16 => Ok(Func::Partial),
            f if f == Func::X as u16 => Ok(Func::X),
            f if f == Func::Rc as u16 => Ok(Func::Rc),
            f if f == Func::NotAll as u16 => Ok(Func::NotAll),
            f if f == Func::All as u16 => Ok(Func::All),
            f if f == Func::Any as u16 => Ok(Func::Any),
            f if f == Func::LtStr as u16 => Ok(Func::LtStr),
            f if f == Func::StrLen as u16 => Ok(Func::StrLen),
            f if f == Func::Cat as u16 => Ok(Func::Cat),
            f if f == Func::Add as u16 => Ok(Func::Add),
            f => Err(anyhow!("invalid Func id: {f}")),
        }
    }
}

impl TryFrom<u16> for FuncCount {
    type Error = anyhow::Error;

    fn try_from(x: u16) -> Result<Self, anyhow::Error> {
        match x {
            f if f == FuncCount::Apply as u16 => Ok(FuncCount::Apply),
            f if f == FuncCount::If as u16 => Ok(FuncCount::If),
            f if f == FuncCount::Head as u16 => Ok(FuncCount::Head),
            f if f == FuncCount::Tail as u16 => Ok(FuncCount::Tail),
            f if f == FuncCount::List as u16 => Ok(FuncCount::List),
            f if f == FuncCount::SubStr as u16 => Ok(FuncCount::SubStr),
            f => Err(anyhow!("invalid FuncCount id: {f}")),
        }
    }
}

impl TryFrom<u8> for FuncExt {
    type Error = anyhow::Error;

    fn try_from(x: u8) -> Result<Self, anyhow::Error> {
        match x {
            f if f == FuncExt::Sha256 as u8 => Ok(FuncExt::Sha256),
            f => Err(anyhow!("invalid FuncExt id: {f}")),
        }
    }
}

/// An operator from any of the three families.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FuncId {
    Func(Func),
    Count(FuncCount),
    Ext(FuncExt),
}

impl FuncId {
    pub const fn name(self) -> &'static str {
        match self {
            FuncId::Func(f) => f.name(),
            FuncId::Count(f) => f.name(),
            FuncId::Ext(f) => f.name(),
        }
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The wire-level opcode assignments. Unlisted codes are reserved and
/// decode as errors. `BLLEVAL` is internal and has no opcode.
const OPCODE_ASSIGNMENTS: [(u8, FuncId); 18] = [
    (0, FuncId::Func(Func::Quote)),
    (1, FuncId::Count(FuncCount::Apply)),
    (3, FuncId::Func(Func::Partial)),
    (4, FuncId::Func(Func::X)),
    (5, FuncId::Count(FuncCount::If)),
    (6, FuncId::Func(Func::Rc)),
    (7, FuncId::Count(FuncCount::Head)),
    (8, FuncId::Count(FuncCount::Tail)),
    (9, FuncId::Count(FuncCount::List)),
    (11, FuncId::Func(Func::NotAll)),
    (12, FuncId::Func(Func::All)),
    (13, FuncId::Func(Func::Any)),
    (15, FuncId::Func(Func::LtStr)),
    (16, FuncId::Func(Func::StrLen)),
    (17, FuncId::Count(FuncCount::SubStr)),
    (18, FuncId::Func(Func::Cat)),
    (23, FuncId::Func(Func::Add)),
    (34, FuncId::Ext(FuncExt::Sha256)),
];

const OPCODE_TABLE: [Option<FuncId>; 256] = build_opcode_table();

const fn build_opcode_table() -> [Option<FuncId>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < OPCODE_ASSIGNMENTS.len() {
        let (code, id) = OPCODE_ASSIGNMENTS[i];
        assert!(table[code as usize].is_none(), "duplicate opcode");
        table[code as usize] = Some(id);
        i += 1;
    }
    table
}

/// Maps a decoded opcode integer to its operator, if assigned.
pub fn lookup_opcode(n: i64) -> Option<FuncId> {
    if !(0..256).contains(&n) {
        return None;
    }
    OPCODE_TABLE[n as usize]
}

/// The inverse of [`lookup_opcode`], for hosts assembling expressions.
pub fn opcode_of(id: FuncId) -> Option<u8> {
    OPCODE_ASSIGNMENTS.iter().find(|(_, f)| *f == id).map(|(code, _)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_assignments() {
        assert_eq!(lookup_opcode(0), Some(FuncId::Func(Func::Quote)));
        assert_eq!(lookup_opcode(1), Some(FuncId::Count(FuncCount::Apply)));
        assert_eq!(lookup_opcode(5), Some(FuncId::Count(FuncCount::If)));
        assert_eq!(lookup_opcode(23), Some(FuncId::Func(Func::Add)));
        assert_eq!(lookup_opcode(34), Some(FuncId::Ext(FuncExt::Sha256)));
    }

    #[test]
    fn reserved_codes_are_unassigned() {
        for code in [2i64, 10, 14, 19, 20, 21, 22, 24, 33, 35, 255] {
            assert_eq!(lookup_opcode(code), None, "opcode {code}");
        }
        assert_eq!(lookup_opcode(-1), None);
        assert_eq!(lookup_opcode(256), None);
        assert_eq!(lookup_opcode(i64::MAX), None);
    }

    #[test]
    fn reverse_lookup() {
        for (code, id) in OPCODE_ASSIGNMENTS {
            assert_eq!(opcode_of(id), Some(code));
            assert_eq!(lookup_opcode(code as i64), Some(id));
        }
        assert_eq!(opcode_of(FuncId::Func(Func::BllEval)), None);
    }

    #[test]
    fn func_id_round_trip() {
        for raw in 0..12u16 {
            let f = Func::try_from(raw).unwrap();
            assert_eq!(f as u16, raw);
        }
        assert!(Func::try_from(12).is_err());
        for raw in 0..6u16 {
            let f = FuncCount::try_from(raw).unwrap();
            assert_eq!(f as u16, raw);
        }
        assert!(FuncCount::try_from(6).is_err());
        assert_eq!(FuncExt::try_from(0).unwrap(), FuncExt::Sha256);
        assert!(FuncExt::try_from(1).is_err());
    }
}
