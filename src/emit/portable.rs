/*!
portable.rs - The portable `Emitter` backend: encodes host ops into a
code-cache region at the region's write pointer.

The emitter borrows the whole code buffer but only writes inside the
`[start, limit)` window of the region being filled. Running past the
window means the per-block space reserve was undersized, which is a bug
in the reserve constant, not a recoverable condition.
*/

use super::ops::{HOST_OP_BYTES, HostOp, Kind};
use super::{Cond, Emitter, HostFn, HostReg, Patch};

pub struct PortableEmitter<'a> {
    buf: &'a mut [u8],
    ptr: usize,
    limit: usize,
}

impl<'a> PortableEmitter<'a> {
    pub fn new(buf: &'a mut [u8], ptr: u32, limit: u32) -> Self {
        Self { buf, ptr: ptr as usize, limit: limit as usize }
    }

    #[cfg(test)]
    pub fn bytes(&self) -> &[u8] {
        self.buf
    }

    fn push(&mut self, op: HostOp) {
        assert!(
            self.ptr + HOST_OP_BYTES <= self.limit,
            "code cache region overflow at {:#x}",
            self.ptr
        );
        op.encode(&mut self.buf[self.ptr..self.ptr + HOST_OP_BYTES]);
        self.ptr += HOST_OP_BYTES;
    }
}

/// Render the ops in `[start, end)` one per line, for trace logging.
pub fn disasm(buf: &[u8], start: u32, end: u32) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let mut at = start as usize;
    while at + HOST_OP_BYTES <= end as usize {
        let op = HostOp::decode(&buf[at..]);
        let _ = writeln!(out, "  {at:06x}  {op}");
        at += HOST_OP_BYTES;
    }
    out
}

impl Emitter for PortableEmitter<'_> {
    fn offset(&self) -> u32 {
        self.ptr as u32
    }

    fn move_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::MovR).regs(d, s, 0, 0));
    }

    fn move_r_imm(&mut self, d: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::MovI).regs(d, 0, 0, 0).imm(imm));
    }

    fn move_r_imm_c(&mut self, cond: Cond, d: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::MovI).cond(cond).regs(d, 0, 0, 0).imm(imm));
    }

    fn add_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::AddR).regs(d, s, 0, 0));
    }

    fn add_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::AddI).regs(r, 0, 0, 0).imm(imm));
    }

    fn add_r_imm_c(&mut self, cond: Cond, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::AddI).cond(cond).regs(r, 0, 0, 0).imm(imm));
    }

    fn sub_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::SubR).regs(d, s, 0, 0));
    }

    fn sub_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::SubI).regs(r, 0, 0, 0).imm(imm));
    }

    fn sub_r_imm_c(&mut self, cond: Cond, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::SubI).cond(cond).regs(r, 0, 0, 0).imm(imm));
    }

    fn and_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::AndR).regs(d, s, 0, 0));
    }

    fn and_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::AndI).regs(r, r, 0, 0).imm(imm));
    }

    fn and_r_r_imm(&mut self, d: HostReg, s: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::AndI).regs(d, s, 0, 0).imm(imm));
    }

    fn or_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::OrR).regs(d, s, 0, 0));
    }

    fn or_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::OrI).regs(r, 0, 0, 0).imm(imm));
    }

    fn or_r_imm_c(&mut self, cond: Cond, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::OrI).cond(cond).regs(r, 0, 0, 0).imm(imm));
    }

    fn or_r_r_lsl(&mut self, d: HostReg, s: HostReg, shift: u32) {
        self.push(HostOp::new(Kind::OrLsl).regs(d, s, 0, 0).imm(shift));
    }

    fn eor_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::EorR).regs(d, s, 0, 0));
    }

    fn eor_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::EorI).regs(r, 0, 0, 0).imm(imm));
    }

    fn eor_r_imm_c(&mut self, cond: Cond, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::EorI).cond(cond).regs(r, 0, 0, 0).imm(imm));
    }

    fn eor_r_r_r(&mut self, d: HostReg, s1: HostReg, s2: HostReg) {
        self.push(HostOp::new(Kind::Eor3).regs(d, s1, s2, 0));
    }

    fn eor_r_r_lsr(&mut self, d: HostReg, s: HostReg, shift: u32) {
        self.push(HostOp::new(Kind::EorLsr).regs(d, s, 0, 0).imm(shift));
    }

    fn bic_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::BicI).regs(r, 0, 0, 0).imm(imm));
    }

    fn mvn_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::Mvn).regs(d, s, 0, 0));
    }

    fn neg_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::Neg).regs(d, s, 0, 0));
    }

    fn lsl(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Lsl).regs(d, s, 0, 0).imm(cnt));
    }

    fn lsr(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Lsr).regs(d, s, 0, 0).imm(cnt));
    }

    fn asr(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Asr).regs(d, s, 0, 0).imm(cnt));
    }

    fn rol(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Rol).regs(d, s, 0, 0).imm(cnt));
    }

    fn ror(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Ror).regs(d, s, 0, 0).imm(cnt));
    }

    fn addf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::AddfR).regs(d, s, 0, 0));
    }

    fn subf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::SubfR).regs(d, s, 0, 0));
    }

    fn subf_r_imm(&mut self, r: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::SubfI).regs(r, 0, 0, 0).imm(imm));
    }

    fn adcf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::AdcfR).regs(d, s, 0, 0));
    }

    fn sbcf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::SbcfR).regs(d, s, 0, 0));
    }

    fn negcf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::NegcfR).regs(d, s, 0, 0));
    }

    fn eorf_r_r(&mut self, d: HostReg, s: HostReg) {
        self.push(HostOp::new(Kind::EorfR).regs(d, s, 0, 0));
    }

    fn lslf(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Lslf).regs(d, s, 0, 0).imm(cnt));
    }

    fn lsrf(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Lsrf).regs(d, s, 0, 0).imm(cnt));
    }

    fn asrf(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Asrf).regs(d, s, 0, 0).imm(cnt));
    }

    fn rolf(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Rolf).regs(d, s, 0, 0).imm(cnt));
    }

    fn rorf(&mut self, d: HostReg, s: HostReg, cnt: u32) {
        self.push(HostOp::new(Kind::Rorf).regs(d, s, 0, 0).imm(cnt));
    }

    fn rolcf(&mut self, r: HostReg) {
        self.push(HostOp::new(Kind::Rolcf).regs(r, 0, 0, 0));
    }

    fn rorcf(&mut self, r: HostReg) {
        self.push(HostOp::new(Kind::Rorcf).regs(r, 0, 0, 0));
    }

    fn tst_r_r(&mut self, a: HostReg, b: HostReg) {
        self.push(HostOp::new(Kind::TstR).regs(a, b, 0, 0));
    }

    fn tst_r_imm(&mut self, a: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::TstI).regs(a, 0, 0, 0).imm(imm));
    }

    fn teq_r_r(&mut self, a: HostReg, b: HostReg) {
        self.push(HostOp::new(Kind::TeqR).regs(a, b, 0, 0));
    }

    fn cmp_r_r(&mut self, a: HostReg, b: HostReg) {
        self.push(HostOp::new(Kind::CmpR).regs(a, b, 0, 0));
    }

    fn cmp_r_imm(&mut self, a: HostReg, imm: u32) {
        self.push(HostOp::new(Kind::CmpI).regs(a, 0, 0, 0).imm(imm));
    }

    fn clear_msb(&mut self, d: HostReg, s: HostReg, count: u32) {
        self.push(HostOp::new(Kind::ClearMsb).regs(d, s, 0, 0).imm(count));
    }

    fn clear_msb_c(&mut self, cond: Cond, d: HostReg, s: HostReg, count: u32) {
        self.push(HostOp::new(Kind::ClearMsb).cond(cond).regs(d, s, 0, 0).imm(count));
    }

    fn sext(&mut self, d: HostReg, s: HostReg, bits: u32) {
        self.push(HostOp::new(Kind::Sext).regs(d, s, 0, 0).imm(bits));
    }

    fn mul(&mut self, d: HostReg, s1: HostReg, s2: HostReg) {
        self.push(HostOp::new(Kind::Mul).regs(d, s1, s2, 0));
    }

    fn mul_u64(&mut self, dlo: HostReg, dhi: HostReg, s1: HostReg, s2: HostReg) {
        self.push(HostOp::new(Kind::MulU64).regs(dlo, dhi, s1, s2));
    }

    fn mul_s64(&mut self, dlo: HostReg, dhi: HostReg, s1: HostReg, s2: HostReg) {
        self.push(HostOp::new(Kind::MulS64).regs(dlo, dhi, s1, s2));
    }

    fn mula_s64(&mut self, dlo: HostReg, dhi: HostReg, s1: HostReg, s2: HostReg) {
        self.push(HostOp::new(Kind::MulaS64).regs(dlo, dhi, s1, s2));
    }

    fn ctx_read(&mut self, r: HostReg, offs: u32) {
        self.push(HostOp::new(Kind::CtxRead).regs(r, 0, 0, 0).imm(offs));
    }

    fn ctx_write(&mut self, r: HostReg, offs: u32) {
        self.push(HostOp::new(Kind::CtxWrite).regs(r, 0, 0, 0).imm(offs));
    }

    fn sjmp_start(&mut self, cond: Cond) -> Patch {
        let at = self.offset();
        self.push(HostOp::new(Kind::B).cond(cond));
        Patch(at)
    }

    fn sjmp_end(&mut self, p: Patch) {
        let target = self.offset();
        let at = p.0 as usize;
        self.buf[at + 6..at + 10].copy_from_slice(&target.to_le_bytes());
    }

    fn jump(&mut self, target: u32) {
        self.push(HostOp::new(Kind::Jump).imm(target));
    }

    fn jump_reg(&mut self, r: HostReg) {
        self.push(HostOp::new(Kind::JumpReg).regs(r, 0, 0, 0));
    }

    fn call(&mut self, f: HostFn) {
        self.push(HostOp::new(Kind::Call).imm(f as u32));
    }

    fn tpop_carry(&mut self, sr: HostReg, _is_sub: bool) {
        // Borrow-style carry: SUBC/NEGC need no inversion on this host.
        self.push(HostOp::new(Kind::TPop).regs(sr, 0, 0, 0));
    }

    fn tpush_carry(&mut self, sr: HostReg, _is_sub: bool) {
        self.push(HostOp::new(Kind::TPush).regs(sr, 0, 0, 0));
    }

    fn div1_step(&mut self, rn: HostReg, rm: HostReg, sr: HostReg) {
        self.push(HostOp::new(Kind::Div1Step).regs(rn, rm, sr, 0));
    }

    fn dtbf_loop(&mut self, rn: HostReg, sr: HostReg) {
        self.push(HostOp::new(Kind::DtbfLoop).regs(rn, sr, 0, 0));
    }

    fn write_sr(&mut self, sr: HostReg, src: HostReg) {
        self.push(HostOp::new(Kind::WriteSr).regs(sr, src, 0, 0));
    }

    fn prologue(&mut self) {
        // The VM enters with a fresh frame; nothing to save.
    }

    fn epilogue(&mut self) {
        self.push(HostOp::new(Kind::Exit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::ops::HOST_OP_BYTES;

    #[test]
    fn sjmp_patches_forward_target() {
        let mut buf = vec![0u8; 256];
        let mut em = PortableEmitter::new(&mut buf, 0, 256);
        let p = em.sjmp_start(Cond::Ne);
        em.move_r_imm(3, 7);
        em.sjmp_end(p);
        let branch = HostOp::decode(&buf[0..]);
        assert_eq!(branch.kind, Kind::B);
        assert_eq!(branch.cond, Cond::Ne);
        assert_eq!(branch.imm, 2 * HOST_OP_BYTES as u32);
    }

    #[test]
    #[should_panic(expected = "code cache region overflow")]
    fn overflowing_region_aborts() {
        let mut buf = vec![0u8; HOST_OP_BYTES];
        let mut em = PortableEmitter::new(&mut buf, 0, HOST_OP_BYTES as u32);
        em.move_r_imm(0, 0);
        em.move_r_imm(0, 0);
    }
}
