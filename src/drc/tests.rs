//! End-to-end tests driving the public `Drc` surface: translation,
//! re-entry, cycle accounting, delay slots, invalidation, and
//! differential runs against the reference interpreter.

use proptest::prelude::*;

use super::Drc;
use crate::bus::Sh2Bus;
use crate::interp;
use crate::sh2::{GuestReg, S, Sh2, T};
use crate::test_utils::{TestBus, asm, load_program};

const ROM_ENTRY: u32 = 0x0200_0000;
const DRAM_ENTRY: u32 = 0x0600_0000;

fn setup(prog: &[u16], entry: u32) -> (Drc, Sh2, TestBus) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut bus = TestBus::new();
    load_program(&mut bus, entry, prog);
    let mut sh2 = Sh2::new(false);
    sh2.set_pc(entry);
    (Drc::new(), sh2, bus)
}

fn assert_same_state(drc_side: &Sh2, interp_side: &Sh2) {
    for i in 0..16 {
        assert_eq!(drc_side.gpr(i), interp_side.gpr(i), "r{i} differs");
    }
    use GuestReg::*;
    for r in [Pc, Pr, Sr, Gbr, Vbr, Mach, Macl] {
        assert_eq!(drc_side.reg(r), interp_side.reg(r), "{r:?} differs");
    }
    assert_eq!(drc_side.cycles_done, interp_side.cycles_done, "cycle accounts differ");
}

// ---------------------------------------------------------------------
// Straight-line execution and cycle accounting
// ---------------------------------------------------------------------

#[test]
fn straight_line_arithmetic() {
    // MOV #5,R1; MOV #7,R2; ADD R1,R2 then spin in place.
    let (mut drc, mut sh2, mut bus) = setup(
        &[
            asm::mov_imm(1, 5),
            asm::mov_imm(2, 7),
            asm::add_rr(1, 2),
            asm::bra(-2), // loops onto itself
            asm::nop(),
        ],
        ROM_ENTRY,
    );
    sh2.assign_flag(T, true);

    // 3 for the arithmetic + 2 for BRA + 1 for the slot.
    drc.execute(&mut sh2, &mut bus, 6);
    assert_eq!(sh2.gpr(1), 5);
    assert_eq!(sh2.gpr(2), 12);
    assert!(sh2.flag(T), "ADD must not touch T");
    assert_eq!(sh2.cycles_done, 6);
    assert_eq!(sh2.pc(), ROM_ENTRY + 6);

    // Re-entry from the cache: the loop body costs 3 per pass.
    drc.execute(&mut sh2, &mut bus, 3);
    assert_eq!(sh2.cycles_done, 9);
    assert_eq!(drc.cache.blocks[0].len(), 2);
}

#[test]
fn overshoot_is_charged_and_repaid() {
    // The BRA+NOP loop block costs 3 cycles but we only ask for 1.
    let (mut drc, mut sh2, mut bus) = setup(&[asm::bra(-2), asm::nop()], ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 1);
    assert_eq!(sh2.cycles_done, 3);
    // The 2-cycle debt is repaid before any more code runs.
    drc.execute(&mut sh2, &mut bus, 2);
    assert_eq!(sh2.cycles_done, 3);
}

#[test]
fn block_terminates_at_cycle_limit_without_branch() {
    let mut prog = vec![asm::nop(); 100];
    prog.push(asm::sleep());
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 200);
    // First block carries exactly the cycle limit, the SLEEP lands in a
    // second one.
    assert_eq!(drc.cache.blocks[0].len(), 2);
    assert_eq!(drc.cache.blocks[0][0].end_addr, ROM_ENTRY + 200);
    assert_eq!(sh2.pc(), ROM_ENTRY + 200);
    assert_eq!(sh2.cycles_done, 201);
}

#[test]
fn delayed_branch_at_cycle_limit_keeps_its_slot() {
    // 99 NOPs, then BRA with an ADD in the delay slot; the branch sits
    // right at the block budget and must still consume the slot.
    let mut prog = vec![asm::nop(); 99];
    prog.push(asm::bra(0)); // target = entry + 202, right past the slot
    prog.push(asm::add_imm(3, 1));
    prog.push(asm::sleep()); // entry + 202
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 102);
    assert_eq!(sh2.gpr(3), 1, "delay slot must execute");
    assert_eq!(sh2.pc(), ROM_ENTRY + 202);
    assert_eq!(drc.cache.blocks[0].len(), 1);
    assert_eq!(sh2.cycles_done, 102);
}

// ---------------------------------------------------------------------
// Branch shaping
// ---------------------------------------------------------------------

#[test]
fn bsr_links_and_returns_past_the_slot() {
    // BSR +4: PR = entry+4, target = entry+8; delay slot is a NOP; the
    // ADD at the target runs exactly once.
    let prog = [
        asm::bsr(2),
        asm::nop(),
        asm::nop(),
        asm::nop(),
        asm::add_imm(3, 1), // entry + 8
        asm::sleep(),
    ];
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.reg(GuestReg::Pr), ROM_ENTRY + 4);
    assert_eq!(sh2.gpr(3), 1);
    assert_eq!(sh2.pc(), ROM_ENTRY + 10);
}

#[test]
fn conditional_branch_selects_path_from_t() {
    let prog = [
        asm::sett(),
        asm::bt(1), // taken -> entry + 8
        asm::mov_imm(0, 5),
        asm::sleep(),
        asm::mov_imm(0, 7), // entry + 8
        asm::sleep(),
    ];
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.gpr(0), 7);

    // Same cached code, T clear this time: falls through.
    let mut sh2 = Sh2::new(false);
    sh2.set_pc(ROM_ENTRY + 2); // skip the SETT
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.gpr(0), 5);
}

#[test]
fn delayed_conditional_branch_runs_slot_both_ways() {
    let prog = [
        asm::bt_s(1), // taken -> entry + 6
        asm::add_imm(3, 1),
        asm::sleep(),
        asm::mov_imm(0, 9), // entry + 6
        asm::sleep(),
    ];
    // Taken: slot runs, then the target.
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    sh2.assign_flag(T, true);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.gpr(3), 1);
    assert_eq!(sh2.gpr(0), 9);

    // Not taken: slot still runs, then the fall-through.
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.gpr(3), 1);
    assert_eq!(sh2.gpr(0), 0);
    assert_eq!(sh2.pc(), ROM_ENTRY + 4); // parked on the SLEEP
}

#[test]
fn jsr_rts_round_trip() {
    // R1 holds the subroutine address; JSR, subroutine adds, RTS back.
    let prog = [
        asm::mov_imm(1, 0x10), // entry + 0x10 fits in a positive byte
        asm::shll2(1),
        asm::jsr(1),
        asm::nop(),
        asm::add_imm(0, 1), // return lands here: entry + 8
        asm::sleep(),
    ];
    let sub = [asm::add_imm(0, 2), asm::rts(), asm::nop()];
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    // R1 = 0x10 << 2 = 0x40, an absolute address in the boot ROM window.
    load_program(&mut bus, 0x40, &sub);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.gpr(0), 3);
    assert_eq!(sh2.pc(), ROM_ENTRY + 10);
}

// ---------------------------------------------------------------------
// The DT/BF fused spin
// ---------------------------------------------------------------------

#[test]
fn dtbf_spin_counts_down_and_falls_through() {
    for rn in [1u32, 2, 5] {
        let prog = [asm::dt(1), asm::bf(-3), asm::sleep()];
        let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
        sh2.set_gpr(1, rn);
        drc.execute(&mut sh2, &mut bus, 1000);

        let (mut sh2i, mut busi) = {
            let mut bus = TestBus::new();
            load_program(&mut bus, ROM_ENTRY, &prog);
            let mut sh2 = Sh2::new(false);
            sh2.set_pc(ROM_ENTRY);
            sh2.set_gpr(1, rn);
            (sh2, bus)
        };
        interp::run(&mut sh2i, &mut busi, 1000);

        assert_same_state(&sh2, &sh2i);
        assert_eq!(sh2.gpr(1), 0);
        assert!(sh2.flag(T));
    }
}

#[test]
fn dtbf_spin_respects_the_cycle_budget() {
    // Counters that cannot reach zero in the budget: the spin runs
    // ceil(budget / 4) iterations, exactly like the unfused pair would
    // over repeated dispatches.
    for rn in [0u32, 0x8000_0000, 0xffff_ffff] {
        let prog = [asm::dt(1), asm::bf(-3), asm::sleep()];
        let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
        sh2.set_gpr(1, rn);
        drc.execute(&mut sh2, &mut bus, 37);
        assert_eq!(sh2.gpr(1), rn.wrapping_sub(10)); // ceil(37/4) passes
        assert!(!sh2.flag(T));
        assert_eq!(sh2.pc(), ROM_ENTRY, "loop must still be live");
        assert_eq!(sh2.cycles_done, 40);
    }
}

// ---------------------------------------------------------------------
// MAC saturation
// ---------------------------------------------------------------------

#[test]
fn mac_l_saturates_to_48_bits() {
    let prog = [asm::mac_l(5, 4), asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    sh2.set_gpr(4, DRAM_ENTRY + 0x100);
    sh2.set_gpr(5, DRAM_ENTRY + 0x104);
    bus.write32(DRAM_ENTRY + 0x100, 0x7fff_ffff);
    bus.write32(DRAM_ENTRY + 0x104, 0x7fff_ffff);
    sh2.set_reg(GuestReg::Mach, 0x7fff);
    sh2.set_reg(GuestReg::Macl, 0xffff_0000);
    sh2.assign_flag(S, true);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.reg(GuestReg::Mach), 0x7fff);
    assert_eq!(sh2.reg(GuestReg::Macl), 0xffff_ffff);
    assert_eq!(sh2.gpr(4), DRAM_ENTRY + 0x104, "post-increment");

    // Negative overflow pins to the bottom of the 48-bit range.
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    sh2.set_gpr(4, DRAM_ENTRY + 0x100);
    sh2.set_gpr(5, DRAM_ENTRY + 0x104);
    bus.write32(DRAM_ENTRY + 0x100, 0x8000_0000u32);
    bus.write32(DRAM_ENTRY + 0x104, 0x7fff_ffff);
    sh2.set_reg(GuestReg::Mach, 0x8000);
    sh2.assign_flag(S, true);
    drc.execute(&mut sh2, &mut bus, 50);
    assert_eq!(sh2.reg(GuestReg::Mach), 0x8000);
    assert_eq!(sh2.reg(GuestReg::Macl), 0x0000_0000);
}

#[test]
fn division_idiom_through_the_recompiler() {
    // DIV0U; 16x DIV1; ROTCL; EXTU.W - 10 / 3 with the divisor in the
    // upper half.
    let mut prog = vec![asm::div0u()];
    for _ in 0..16 {
        prog.push(asm::div1(1, 0));
    }
    prog.push(asm::rotcl(0));
    prog.push(asm::extu_w(0, 0));
    prog.push(asm::sleep());
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    sh2.set_gpr(0, 10);
    sh2.set_gpr(1, 3 << 16);
    drc.execute(&mut sh2, &mut bus, 100);
    assert_eq!(sh2.gpr(0), 3);
}

// ---------------------------------------------------------------------
// Cache management and invalidation
// ---------------------------------------------------------------------

#[test]
fn flush_all_rewinds_and_forces_retranslation() {
    let prog = [asm::mov_imm(0, 1), asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&prog, ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(drc.cache.blocks[0].len(), 1);
    let used = drc.cache.region_used(0);
    assert!(used > 0);

    drc.flush_all();
    for region in 0..3 {
        assert_eq!(drc.cache.ptrs[region], drc.cache.bases[region]);
        assert!(drc.cache.blocks[region].is_empty());
    }
    assert_eq!(drc.cache.hash_head(ROM_ENTRY), 0);

    // Next dispatch misses and retranslates.
    sh2.set_pc(ROM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(drc.cache.blocks[0].len(), 1);
    assert_eq!(sh2.gpr(0), 1);
}

#[test]
fn host_write_invalidates_covering_dram_block() {
    let prog = [asm::mov_imm(0, 1), asm::sleep()];
    let other = [asm::mov_imm(0, 3), asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&prog, DRAM_ENTRY);
    load_program(&mut bus, DRAM_ENTRY + 0x80, &other);

    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 1);
    let mut sh2b = Sh2::new(false);
    sh2b.set_pc(DRAM_ENTRY + 0x80);
    drc.execute(&mut sh2b, &mut bus, 10);
    assert_eq!(drc.cache.blocks[0].len(), 2);

    // The 68k side rewrites the first instruction.
    bus.write16(DRAM_ENTRY, asm::mov_imm(0, 2));
    drc.wcheck_ram(DRAM_ENTRY, u32::from(asm::mov_imm(0, 2)), 0);

    // Covered block is dead; the unrelated one survives.
    assert_eq!(drc.cache.blocks[0][0].addr, 0);
    assert_eq!(drc.cache.blocks[0][1].addr, DRAM_ENTRY + 0x80);

    sh2.set_pc(DRAM_ENTRY);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 2, "stale translation must not run");
    assert_eq!(drc.cache.blocks[0].len(), 3);

    sh2b.set_pc(DRAM_ENTRY + 0x80);
    drc.execute(&mut sh2b, &mut bus, 10);
    assert_eq!(sh2b.gpr(0), 3);
    assert_eq!(drc.cache.blocks[0].len(), 3, "survivor still cached");
}

#[test]
fn guest_write_from_translated_code_invalidates() {
    // A DRAM program patches another DRAM block, then the patched block
    // is re-run: it must be retranslated with the new opcode.
    let victim = [asm::mov_imm(0, 1), asm::sleep()];
    let patcher = [
        // r2 = 0xe002 (MOV #2,R0)
        asm::mov_imm(2, 0x0e),
        asm::shll8(2),
        asm::shll2(2),
        asm::shll2(2),
        asm::add_imm(2, 2),
        // r1 = 0x0600_0100
        asm::mov_imm(1, 6),
        asm::shll16(1),
        asm::shll8(1),
        asm::add_imm(1, 0x7f),
        asm::add_imm(1, 0x7f),
        asm::add_imm(1, 2),
        asm::mov_w_store(2, 1),
        asm::sleep(),
    ];
    let (mut drc, mut sh2, mut bus) = setup(&victim, DRAM_ENTRY + 0x100);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 1);

    load_program(&mut bus, DRAM_ENTRY + 0x200, &patcher);
    let mut sh2p = Sh2::new(false);
    sh2p.set_pc(DRAM_ENTRY + 0x200);
    drc.execute(&mut sh2p, &mut bus, 60);
    assert_eq!(sh2p.gpr(1), DRAM_ENTRY + 0x100);
    assert_eq!(bus.read16(DRAM_ENTRY + 0x100), 0xe002);

    let mut sh2 = Sh2::new(false);
    sh2.set_pc(DRAM_ENTRY + 0x100);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 2);
}

#[test]
fn colliding_hash_buckets_chain() {
    // 0x800 bytes apart: both PCs land in hash bucket 0.
    let a = ROM_ENTRY;
    let b = ROM_ENTRY + 0x800;
    let prog_a = [asm::mov_imm(0, 1), asm::sleep()];
    let prog_b = [asm::mov_imm(0, 2), asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&prog_a, a);
    load_program(&mut bus, b, &prog_b);

    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 1);

    sh2 = Sh2::new(false);
    sh2.set_pc(b);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 2);

    // Both blocks stay reachable through the chain; nothing retranslates.
    sh2 = Sh2::new(false);
    sh2.set_pc(a);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 1);
    assert_eq!(drc.cache.blocks[0].len(), 2);
}

#[test]
fn bios_blocks_use_the_internal_region() {
    let prog = [asm::mov_imm(0, 4), asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&prog, 0x0000_0200);
    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.gpr(0), 4);
    assert!(drc.cache.blocks[0].is_empty());
    assert_eq!(drc.cache.blocks[1].len(), 1);

    // The slave CPU gets its own region for the same addresses.
    let mut slave = Sh2::new(true);
    slave.set_pc(0x0000_0200);
    drc.execute(&mut slave, &mut bus, 10);
    assert_eq!(drc.cache.blocks[2].len(), 1);
}

#[test]
fn invalid_pc_is_interpreted_not_fatal() {
    let (mut drc, mut sh2, mut bus) = setup(&[], ROM_ENTRY);
    sh2.set_pc(0x8000_0000);
    drc.execute(&mut sh2, &mut bus, 5);
    assert_eq!(sh2.cycles_done, 5);
    assert_eq!(sh2.pc(), 0x8000_0000 + 10);
    assert!(drc.cache.blocks.iter().all(|b| b.is_empty()));
}

// ---------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------

#[test]
fn pending_irq_is_accepted_before_dispatch() {
    let handler = [asm::sleep()];
    let (mut drc, mut sh2, mut bus) = setup(&[], ROM_ENTRY);
    load_program(&mut bus, 0x0000_0200, &handler);
    // Vector 69 (IRL 10 autovector) points at the handler.
    bus.write32(69 * 4, 0x0000_0200);
    sh2.set_reg(GuestReg::Sp, DRAM_ENTRY + 0x1000);
    sh2.set_pc(ROM_ENTRY + 0x40);
    sh2.pending_level = 10;
    sh2.pending_irl = 10;

    drc.execute(&mut sh2, &mut bus, 10);
    assert_eq!(sh2.i_level(), 10);
    assert_eq!(sh2.pc(), 0x0000_0200);
    assert_eq!(bus.read32(DRAM_ENTRY + 0x1000 - 8), ROM_ENTRY + 0x40);
}

// ---------------------------------------------------------------------
// Differential: recompiled vs interpreted
// ---------------------------------------------------------------------

/// Straight-line opcode pool for differential runs: everything with no
/// memory traffic and no control flow.
fn pool_op(k: usize, rn: u8, rm: u8, imm: i8) -> u16 {
    match k % 50 {
        0 => asm::mov_imm(rn, imm),
        1 => asm::mov_rr(rm, rn),
        2 => asm::add_rr(rm, rn),
        3 => asm::add_imm(rn, imm),
        4 => asm::sub_rr(rm, rn),
        5 => asm::addc(rm, rn),
        6 => asm::subc(rm, rn),
        7 => asm::addv(rm, rn),
        8 => asm::subv(rm, rn),
        9 => asm::and_rr(rm, rn),
        10 => asm::or_rr(rm, rn),
        11 => asm::xor_rr(rm, rn),
        12 => asm::tst_rr(rm, rn),
        13 => asm::cmp_str(rm, rn),
        14 => asm::xtrct(rm, rn),
        15 => asm::div0s(rm, rn),
        16 => asm::div0u(),
        17 => asm::div1(rm, rn),
        18 => asm::mulu_w(rm, rn),
        19 => asm::muls_w(rm, rn),
        20 => asm::mul_l(rm, rn),
        21 => asm::dmulu_l(rm, rn),
        22 => asm::dmuls_l(rm, rn),
        23 => asm::cmp_eq(rm, rn),
        24 => asm::cmp_hs(rm, rn),
        25 => asm::cmp_gt(rm, rn),
        26 => asm::cmp_pz(rn),
        27 => asm::cmp_pl(rn),
        28 => asm::cmp_eq_imm(imm),
        29 => asm::neg(rm, rn),
        30 => asm::negc(rm, rn),
        31 => asm::not(rm, rn),
        32 => asm::swap_b(rm, rn),
        33 => asm::swap_w(rm, rn),
        34 => asm::extu_b(rm, rn),
        35 => asm::exts_w(rm, rn),
        36 => asm::shll(rn),
        37 => asm::shlr(rn),
        38 => asm::shar(rn),
        39 => asm::rotl(rn),
        40 => asm::rotr(rn),
        41 => asm::rotcl(rn),
        42 => asm::rotcr(rn),
        43 => asm::shll8(rn),
        44 => asm::dt(rn),
        45 => asm::movt(rn),
        46 => asm::sts_macl(rn),
        47 => asm::lds_mach(rn),
        48 => asm::stc_sr(rn),
        _ => asm::tst_imm(imm as u8),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn recompiled_matches_interpreted(
        ops in prop::collection::vec((0usize..50, 0u8..16, 0u8..16, any::<i8>()), 1..60),
        regs in prop::array::uniform16(any::<u32>()),
        mach in any::<u32>(),
        macl in any::<u32>(),
        flags in 0u32..16,
    ) {
        let mut prog: Vec<u16> = ops
            .iter()
            .map(|&(k, rn, rm, imm)| pool_op(k, rn, rm, imm))
            .collect();
        prog.push(asm::sleep());

        let init = |bus: &mut TestBus| {
            load_program(bus, ROM_ENTRY, &prog);
            let mut sh2 = Sh2::new(false);
            sh2.set_pc(ROM_ENTRY);
            for (i, &v) in regs.iter().enumerate() {
                sh2.set_gpr(i as u8, v);
            }
            sh2.set_reg(GuestReg::Mach, mach);
            sh2.set_reg(GuestReg::Macl, macl);
            // Scatter T/S/Q/M from the flag nibble.
            sh2.set_sr(((flags & 3) | ((flags & 0xc) << 6)) & 0x3f3);
            sh2
        };

        let mut bus_d = TestBus::new();
        let mut sh2_d = init(&mut bus_d);
        let mut drc = Drc::new();
        drc.execute(&mut sh2_d, &mut bus_d, 300);

        let mut bus_i = TestBus::new();
        let mut sh2_i = init(&mut bus_i);
        interp::run(&mut sh2_i, &mut bus_i, 300);

        assert_same_state(&sh2_d, &sh2_i);
    }
}
