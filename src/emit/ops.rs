/*!
ops.rs - The portable host instruction set: a fixed-width, buffer-relative
encoding that the `PortableEmitter` writes and the `Vm` executes.

Every op occupies `HOST_OP_BYTES` bytes:

    byte 0     kind
    byte 1     condition (predicate; `Al` for unconditional)
    bytes 2-5  register operands a, b, c, d (unused ones are zero)
    bytes 6-9  32-bit immediate, little endian

Branch targets (`B`, `Jump`) are absolute byte offsets into the code
buffer, so regions are self-contained and relocatable only by
regeneration.
*/

use std::fmt;

use super::Cond;

/// Encoded size of one host op.
pub const HOST_OP_BYTES: usize = 10;

/// Operation kinds of the portable host ISA.
///
/// Operand conventions: `a` is the destination (or the lone operand),
/// `b`/`c`/`d` are sources; wide multiplies use a=lo, b=hi, c/d=sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    MovR = 0,
    MovI,
    AddR,
    AddI,
    SubR,
    SubI,
    AndR,
    /// a = b & imm
    AndI,
    OrR,
    OrI,
    /// a |= b << imm
    OrLsl,
    EorR,
    EorI,
    /// a = b ^ c
    Eor3,
    /// a ^= b >> imm
    EorLsr,
    /// a &= !imm
    BicI,
    Mvn,
    Neg,
    Lsl,
    Lsr,
    Asr,
    Rol,
    Ror,
    AddfR,
    SubfR,
    SubfI,
    AdcfR,
    SbcfR,
    NegcfR,
    EorfR,
    Lslf,
    Lsrf,
    Asrf,
    Rolf,
    Rorf,
    Rolcf,
    Rorcf,
    TstR,
    TstI,
    TeqR,
    CmpR,
    CmpI,
    /// a = b with imm most-significant bits cleared
    ClearMsb,
    /// a = sign-extension of b's low imm bits
    Sext,
    Mul,
    MulU64,
    MulS64,
    MulaS64,
    CtxRead,
    CtxWrite,
    /// Conditional branch to absolute offset imm
    B,
    /// Unconditional branch to absolute offset imm
    Jump,
    /// Branch to the offset held in register a
    JumpReg,
    /// Call the `HostFn` with id imm
    Call,
    /// carry = a & 1; a &= !1
    TPop,
    /// a |= carry
    TPush,
    /// DIV1 add-or-subtract step on (rn=a, rm=b, sr=c)
    Div1Step,
    /// Fused DT/BF spin on (rn=a, sr=b)
    DtbfLoop,
    /// Masked guest SR write (sr=a, src=b)
    WriteSr,
    /// Leave translated code (end of the exit trampoline)
    Exit,
}

impl Kind {
    const ALL: [Kind; 60] = [
        Kind::MovR,
        Kind::MovI,
        Kind::AddR,
        Kind::AddI,
        Kind::SubR,
        Kind::SubI,
        Kind::AndR,
        Kind::AndI,
        Kind::OrR,
        Kind::OrI,
        Kind::OrLsl,
        Kind::EorR,
        Kind::EorI,
        Kind::Eor3,
        Kind::EorLsr,
        Kind::BicI,
        Kind::Mvn,
        Kind::Neg,
        Kind::Lsl,
        Kind::Lsr,
        Kind::Asr,
        Kind::Rol,
        Kind::Ror,
        Kind::AddfR,
        Kind::SubfR,
        Kind::SubfI,
        Kind::AdcfR,
        Kind::SbcfR,
        Kind::NegcfR,
        Kind::EorfR,
        Kind::Lslf,
        Kind::Lsrf,
        Kind::Asrf,
        Kind::Rolf,
        Kind::Rorf,
        Kind::Rolcf,
        Kind::Rorcf,
        Kind::TstR,
        Kind::TstI,
        Kind::TeqR,
        Kind::CmpR,
        Kind::CmpI,
        Kind::ClearMsb,
        Kind::Sext,
        Kind::Mul,
        Kind::MulU64,
        Kind::MulS64,
        Kind::MulaS64,
        Kind::CtxRead,
        Kind::CtxWrite,
        Kind::B,
        Kind::Jump,
        Kind::JumpReg,
        Kind::Call,
        Kind::TPop,
        Kind::TPush,
        Kind::Div1Step,
        Kind::DtbfLoop,
        Kind::WriteSr,
        Kind::Exit,
    ];
}

/// One decoded host op.
#[derive(Debug, Clone, Copy)]
pub struct HostOp {
    pub kind: Kind,
    pub cond: Cond,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub imm: u32,
}

impl HostOp {
    pub fn new(kind: Kind) -> Self {
        Self { kind, cond: Cond::Al, a: 0, b: 0, c: 0, d: 0, imm: 0 }
    }

    pub fn cond(mut self, cond: Cond) -> Self {
        self.cond = cond;
        self
    }

    pub fn regs(mut self, a: u8, b: u8, c: u8, d: u8) -> Self {
        (self.a, self.b, self.c, self.d) = (a, b, c, d);
        self
    }

    pub fn imm(mut self, imm: u32) -> Self {
        self.imm = imm;
        self
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.kind as u8;
        buf[1] = self.cond as u8;
        buf[2] = self.a;
        buf[3] = self.b;
        buf[4] = self.c;
        buf[5] = self.d;
        buf[6..10].copy_from_slice(&self.imm.to_le_bytes());
    }

    /// Decode the op at the start of `buf`. The buffer only ever contains
    /// ops this crate encoded, so a malformed kind byte is an internal
    /// corruption and panics.
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            kind: Kind::ALL[buf[0] as usize],
            cond: Cond::ALL[buf[1] as usize],
            a: buf[2],
            b: buf[3],
            c: buf[4],
            d: buf[5],
            imm: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
        }
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = if self.cond == Cond::Al {
            String::new()
        } else {
            format!(".{:?}", self.cond).to_lowercase()
        };
        let HostOp { a, b, imm, .. } = *self;
        match self.kind {
            Kind::MovR => write!(f, "mov{c} h{a}, h{b}"),
            Kind::MovI => write!(f, "mov{c} h{a}, #{imm:#x}"),
            Kind::AddR => write!(f, "add{c} h{a}, h{b}"),
            Kind::AddI => write!(f, "add{c} h{a}, #{imm:#x}"),
            Kind::SubR => write!(f, "sub{c} h{a}, h{b}"),
            Kind::SubI => write!(f, "sub{c} h{a}, #{imm:#x}"),
            Kind::AndR => write!(f, "and{c} h{a}, h{b}"),
            Kind::AndI => write!(f, "and{c} h{a}, h{b}, #{imm:#x}"),
            Kind::OrR => write!(f, "or{c} h{a}, h{b}"),
            Kind::OrI => write!(f, "or{c} h{a}, #{imm:#x}"),
            Kind::OrLsl => write!(f, "or{c} h{a}, h{b} lsl #{imm}"),
            Kind::EorR => write!(f, "eor{c} h{a}, h{b}"),
            Kind::EorI => write!(f, "eor{c} h{a}, #{imm:#x}"),
            Kind::Eor3 => write!(f, "eor{c} h{a}, h{b}, h{}", self.c),
            Kind::EorLsr => write!(f, "eor{c} h{a}, h{b} lsr #{imm}"),
            Kind::BicI => write!(f, "bic{c} h{a}, #{imm:#x}"),
            Kind::Mvn => write!(f, "mvn{c} h{a}, h{b}"),
            Kind::Neg => write!(f, "neg{c} h{a}, h{b}"),
            Kind::Lsl => write!(f, "lsl{c} h{a}, h{b}, #{imm}"),
            Kind::Lsr => write!(f, "lsr{c} h{a}, h{b}, #{imm}"),
            Kind::Asr => write!(f, "asr{c} h{a}, h{b}, #{imm}"),
            Kind::Rol => write!(f, "rol{c} h{a}, h{b}, #{imm}"),
            Kind::Ror => write!(f, "ror{c} h{a}, h{b}, #{imm}"),
            Kind::AddfR => write!(f, "addfs{c} h{a}, h{b}"),
            Kind::SubfR => write!(f, "subfs{c} h{a}, h{b}"),
            Kind::SubfI => write!(f, "subfs{c} h{a}, #{imm:#x}"),
            Kind::AdcfR => write!(f, "adcs{c} h{a}, h{b}"),
            Kind::SbcfR => write!(f, "sbcs{c} h{a}, h{b}"),
            Kind::NegcfR => write!(f, "negcs{c} h{a}, h{b}"),
            Kind::EorfR => write!(f, "eors{c} h{a}, h{b}"),
            Kind::Lslf => write!(f, "lsls{c} h{a}, h{b}, #{imm}"),
            Kind::Lsrf => write!(f, "lsrs{c} h{a}, h{b}, #{imm}"),
            Kind::Asrf => write!(f, "asrs{c} h{a}, h{b}, #{imm}"),
            Kind::Rolf => write!(f, "rols{c} h{a}, h{b}, #{imm}"),
            Kind::Rorf => write!(f, "rors{c} h{a}, h{b}, #{imm}"),
            Kind::Rolcf => write!(f, "rolcs{c} h{a}"),
            Kind::Rorcf => write!(f, "rorcs{c} h{a}"),
            Kind::TstR => write!(f, "tst{c} h{a}, h{b}"),
            Kind::TstI => write!(f, "tst{c} h{a}, #{imm:#x}"),
            Kind::TeqR => write!(f, "teq{c} h{a}, h{b}"),
            Kind::CmpR => write!(f, "cmp{c} h{a}, h{b}"),
            Kind::CmpI => write!(f, "cmp{c} h{a}, #{imm:#x}"),
            Kind::ClearMsb => write!(f, "clrmsb{c} h{a}, h{b}, #{imm}"),
            Kind::Sext => write!(f, "sext{c} h{a}, h{b}, #{imm}"),
            Kind::Mul => write!(f, "mul{c} h{a}, h{b}, h{}", self.c),
            Kind::MulU64 => write!(f, "umull{c} h{a}, h{b}, h{}, h{}", self.c, self.d),
            Kind::MulS64 => write!(f, "smull{c} h{a}, h{b}, h{}, h{}", self.c, self.d),
            Kind::MulaS64 => write!(f, "smlal{c} h{a}, h{b}, h{}, h{}", self.c, self.d),
            Kind::CtxRead => write!(f, "ldr{c} h{a}, [ctx, #{imm:#x}]"),
            Kind::CtxWrite => write!(f, "str{c} h{a}, [ctx, #{imm:#x}]"),
            Kind::B => write!(f, "b{c} {imm:#x}"),
            Kind::Jump => write!(f, "jump{c} {imm:#x}"),
            Kind::JumpReg => write!(f, "jump{c} h{a}"),
            Kind::Call => write!(f, "call{c} fn#{imm}"),
            Kind::TPop => write!(f, "tpop{c} h{a}"),
            Kind::TPush => write!(f, "tpush{c} h{a}"),
            Kind::Div1Step => write!(f, "div1{c} h{a}, h{b}, h{}", self.c),
            Kind::DtbfLoop => write!(f, "dtbf{c} h{a}, h{b}"),
            Kind::WriteSr => write!(f, "wrsr{c} h{a}, h{b}"),
            Kind::Exit => write!(f, "exit{c}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let op = HostOp::new(Kind::AddI)
            .cond(Cond::Lt)
            .regs(3, 0, 0, 0)
            .imm(0xdead_beef);
        let mut buf = [0u8; HOST_OP_BYTES];
        op.encode(&mut buf);
        let back = HostOp::decode(&buf);
        assert_eq!(back.kind, Kind::AddI);
        assert_eq!(back.cond, Cond::Lt);
        assert_eq!(back.a, 3);
        assert_eq!(back.imm, 0xdead_beef);
    }

    #[test]
    fn kind_table_matches_discriminants() {
        for (i, k) in Kind::ALL.iter().enumerate() {
            assert_eq!(*k as usize, i);
        }
        for (i, c) in Cond::ALL.iter().enumerate() {
            assert_eq!(*c as usize, i);
        }
    }
}
