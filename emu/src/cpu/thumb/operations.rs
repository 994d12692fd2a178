//! Execution of the decoded Thumb instruction set. Most operations
//! reuse the ARM ALU helpers; the branches and the long BL pair are the
//! only Thumb-specific control flow.

use crate::bitwise::Bits;
use crate::bus::{Access, Bus};
use crate::cpu::alu::{add_with_carry, shift_register, sub_with_carry, ShiftKind};
use crate::cpu::arm7tdmi::{Arm7tdmi, Exception, SIZE_OF_THUMB_INSTRUCTION};
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER, REG_SP};
use crate::cpu::thumb::instruction::{ThumbAluOp, ThumbModeInstruction, ThumbModeOpcode};

impl Arm7tdmi {
    /// Execute one decoded Thumb instruction. Returns whether the PC
    /// still has to be advanced past it.
    pub fn execute_thumb(&mut self, op: ThumbModeOpcode, bus: &mut Bus) -> bool {
        use ThumbModeInstruction::*;

        match op.instruction {
            MoveShiftedRegister {
                kind,
                offset,
                rs,
                rd,
            } => {
                // Offset 0 keeps the LSR#32/ASR#32 encodings from the
                // ARM immediate shifter, except LSL#0 which is a move.
                let amount = if offset == 0 && kind != ShiftKind::Lsl {
                    32
                } else {
                    offset
                };
                let (result, carry) =
                    shift_register(kind, amount, self.read_register(rs), self.cpsr.carry_flag());
                self.cpsr.set_flags(result);
                self.cpsr.set_carry_flag(carry);
                self.write_register(rd, result);
                true
            }
            AddSubtract {
                subtract,
                immediate,
                value,
                rs,
                rd,
            } => {
                let operand = if immediate {
                    value as u32
                } else {
                    self.read_register(value)
                };
                let first = self.read_register(rs);
                let result = if subtract {
                    sub_with_carry(first, operand, true)
                } else {
                    add_with_carry(first, operand, false)
                };
                self.cpsr.set_flags(result.result);
                self.cpsr.set_carry_flag(result.carry);
                self.cpsr.set_overflow_flag(result.overflow);
                self.write_register(rd, result.result);
                true
            }
            MoveCompareAddSubtract { op, rd, immediate } => {
                let current = self.read_register(rd);
                let result = match op {
                    0 => {
                        self.cpsr.set_flags(immediate);
                        Some(immediate)
                    }
                    1 | 3 => {
                        let result = sub_with_carry(current, immediate, true);
                        self.cpsr.set_flags(result.result);
                        self.cpsr.set_carry_flag(result.carry);
                        self.cpsr.set_overflow_flag(result.overflow);
                        (op == 3).then_some(result.result)
                    }
                    _ => {
                        let result = add_with_carry(current, immediate, false);
                        self.cpsr.set_flags(result.result);
                        self.cpsr.set_carry_flag(result.carry);
                        self.cpsr.set_overflow_flag(result.overflow);
                        Some(result.result)
                    }
                };
                if let Some(value) = result {
                    self.write_register(rd, value);
                }
                true
            }
            Alu { op, rs, rd } => self.thumb_alu(op, rs, rd, bus),
            HiRegisterOpBx { op, rs, rd } => self.hi_register_op(op, rs, rd),
            PcRelativeLoad { rd, word_offset } => {
                let base = (self.read_register(REG_PROGRAM_COUNTER) & !2)
                    .wrapping_add(word_offset * 4);
                let value = bus.read_word(base, Access::NonSequential);
                bus.idle(1);
                self.write_register(rd, value);
                true
            }
            LoadStoreRegisterOffset {
                load,
                byte,
                ro,
                rb,
                rd,
            } => {
                let address = self.read_register(rb).wrapping_add(self.read_register(ro));
                self.load_store(load, byte, address, rd, bus);
                true
            }
            LoadStoreSignExtended {
                h_flag,
                sign_extend,
                ro,
                rb,
                rd,
            } => {
                let address = self.read_register(rb).wrapping_add(self.read_register(ro));
                let value = match (sign_extend, h_flag) {
                    // STRH
                    (false, false) => {
                        let value = self.read_register(rd) as u16;
                        bus.write_half(address & !1, value, Access::NonSequential);
                        return true;
                    }
                    // LDRH
                    (false, true) => {
                        u32::from(bus.read_half(address & !1, Access::NonSequential))
                    }
                    // LDSB
                    (true, false) => bus.read_byte(address, Access::NonSequential) as i8 as u32,
                    // LDSH
                    (true, true) => {
                        bus.read_half(address & !1, Access::NonSequential) as i16 as u32
                    }
                };
                bus.idle(1);
                self.write_register(rd, value);
                true
            }
            LoadStoreImmediateOffset {
                load,
                byte,
                offset,
                rb,
                rd,
            } => {
                let scaled = if byte { offset } else { offset * 4 };
                let address = self.read_register(rb).wrapping_add(scaled);
                self.load_store(load, byte, address, rd, bus);
                true
            }
            LoadStoreHalfword {
                load,
                offset,
                rb,
                rd,
            } => {
                let address = self.read_register(rb).wrapping_add(offset) & !1;
                if load {
                    let value = u32::from(bus.read_half(address, Access::NonSequential));
                    bus.idle(1);
                    self.write_register(rd, value);
                } else {
                    bus.write_half(address, self.read_register(rd) as u16, Access::NonSequential);
                }
                true
            }
            SpRelativeLoadStore {
                load,
                rd,
                word_offset,
            } => {
                let address = self.read_register(REG_SP).wrapping_add(word_offset * 4);
                self.load_store(load, false, address, rd, bus);
                true
            }
            LoadAddress {
                from_sp,
                rd,
                word_offset,
            } => {
                let base = if from_sp {
                    self.read_register(REG_SP)
                } else {
                    self.read_register(REG_PROGRAM_COUNTER) & !2
                };
                self.write_register(rd, base.wrapping_add(word_offset * 4));
                true
            }
            AddOffsetToStackPointer { offset } => {
                let sp = self.read_register(REG_SP).wrapping_add(offset as u32);
                self.write_register(REG_SP, sp);
                true
            }
            PushPopRegisters {
                load,
                pc_lr,
                register_list,
            } => self.push_pop(load, pc_lr, register_list, bus),
            MultipleLoadStore {
                load,
                rb,
                register_list,
            } => {
                let mut address = self.read_register(rb) & !3;
                let mut access = Access::NonSequential;
                for index in 0..8 {
                    if register_list.is_bit_off(index) {
                        continue;
                    }
                    if load {
                        let value = bus.read_word(address, access);
                        self.write_register(usize::from(index), value);
                    } else {
                        bus.write_word(address, self.read_register(usize::from(index)), access);
                    }
                    address = address.wrapping_add(4);
                    access = Access::Sequential;
                }
                if load {
                    bus.idle(1);
                }
                if register_list != 0 {
                    self.write_register(rb, address);
                }
                true
            }
            ConditionalBranch { condition, offset } => {
                if self.cpsr.can_execute(condition) {
                    let target = self
                        .read_register(REG_PROGRAM_COUNTER)
                        .wrapping_add(offset as u32);
                    self.jump(target);
                    bus.idle(1);
                    false
                } else {
                    true
                }
            }
            SoftwareInterrupt => {
                self.exception(Exception::SoftwareInterrupt);
                false
            }
            UnconditionalBranch { offset } => {
                let target = self
                    .read_register(REG_PROGRAM_COUNTER)
                    .wrapping_add(offset as u32);
                self.jump(target);
                bus.idle(1);
                false
            }
            LongBranchWithLink { low, offset } => {
                if low {
                    // Second half: jump and leave the return address in
                    // LR with bit 0 set.
                    let target = self.read_register(REG_LR).wrapping_add(offset << 1);
                    let return_address =
                        self.registers.program_counter() + SIZE_OF_THUMB_INSTRUCTION;
                    self.write_register(REG_LR, return_address | 1);
                    self.jump(target);
                    false
                } else {
                    // First half: stage the upper offset bits in LR.
                    let upper = ((offset << 21) as i32 >> 9) as u32;
                    let lr = self
                        .read_register(REG_PROGRAM_COUNTER)
                        .wrapping_add(upper);
                    self.write_register(REG_LR, lr);
                    true
                }
            }
            Undefined => {
                logger::trace(format!("undefined Thumb opcode 0x{:04X}", op.raw));
                self.exception(Exception::UndefinedInstruction);
                false
            }
        }
    }

    fn load_store(&mut self, load: bool, byte: bool, address: u32, rd: usize, bus: &mut Bus) {
        if load {
            let value = if byte {
                u32::from(bus.read_byte(address, Access::NonSequential))
            } else {
                bus.read_word_rotated(address, Access::NonSequential)
            };
            bus.idle(1);
            self.write_register(rd, value);
        } else {
            let value = self.read_register(rd);
            if byte {
                bus.write_byte(address, value as u8, Access::NonSequential);
            } else {
                bus.write_word(address & !3, value, Access::NonSequential);
            }
        }
    }

    fn thumb_alu(&mut self, op: ThumbAluOp, rs: usize, rd: usize, bus: &mut Bus) -> bool {
        use ThumbAluOp::*;

        let operand = self.read_register(rs);
        let current = self.read_register(rd);
        let carry_in = self.cpsr.carry_flag();

        let update_logical_flags = |cpu: &mut Self, result: u32| {
            cpu.cpsr.set_flags(result);
            result
        };

        let result = match op {
            And => Some(update_logical_flags(self, current & operand)),
            Eor => Some(update_logical_flags(self, current ^ operand)),
            Orr => Some(update_logical_flags(self, current | operand)),
            Bic => Some(update_logical_flags(self, current & !operand)),
            Mvn => Some(update_logical_flags(self, !operand)),
            Tst => {
                update_logical_flags(self, current & operand);
                None
            }
            Lsl | Lsr | Asr | Ror => {
                let kind = match op {
                    Lsl => ShiftKind::Lsl,
                    Lsr => ShiftKind::Lsr,
                    Asr => ShiftKind::Asr,
                    _ => ShiftKind::Ror,
                };
                let (result, carry) = shift_register(kind, operand & 0xFF, current, carry_in);
                self.cpsr.set_flags(result);
                self.cpsr.set_carry_flag(carry);
                bus.idle(1);
                Some(result)
            }
            Adc | Sbc | Neg | Cmp | Cmn => {
                let result = match op {
                    Adc => add_with_carry(current, operand, carry_in),
                    Sbc => sub_with_carry(current, operand, carry_in),
                    Neg => sub_with_carry(0, operand, true),
                    Cmp => sub_with_carry(current, operand, true),
                    _ => add_with_carry(current, operand, false),
                };
                self.cpsr.set_flags(result.result);
                self.cpsr.set_carry_flag(result.carry);
                self.cpsr.set_overflow_flag(result.overflow);
                matches!(op, Adc | Sbc | Neg).then_some(result.result)
            }
            Mul => {
                let result = current.wrapping_mul(operand);
                self.cpsr.set_flags(result);
                bus.idle(1);
                Some(result)
            }
        };

        if let Some(value) = result {
            self.write_register(rd, value);
        }
        true
    }

    fn hi_register_op(&mut self, op: u16, rs: usize, rd: usize) -> bool {
        let operand = self.read_register(rs);

        match op {
            // ADD without flags.
            0 => {
                let result = self.read_register(rd).wrapping_add(operand);
                if rd == REG_PROGRAM_COUNTER {
                    self.jump(result);
                    return false;
                }
                self.write_register(rd, result);
            }
            // CMP, the only flag-setting hi-register op.
            1 => {
                let result = sub_with_carry(self.read_register(rd), operand, true);
                self.cpsr.set_flags(result.result);
                self.cpsr.set_carry_flag(result.carry);
                self.cpsr.set_overflow_flag(result.overflow);
            }
            // MOV without flags.
            2 => {
                if rd == REG_PROGRAM_COUNTER {
                    self.jump(operand);
                    return false;
                }
                self.write_register(rd, operand);
            }
            // BX.
            _ => {
                self.branch_and_exchange(operand);
                return false;
            }
        }
        true
    }

    fn push_pop(&mut self, load: bool, pc_lr: bool, register_list: u8, bus: &mut Bus) -> bool {
        let mut advance = true;
        let count = u32::from(register_list.count_ones()) + u32::from(pc_lr);
        let sp = self.read_register(REG_SP);

        if load {
            // POP walks upward from SP.
            let mut address = sp & !3;
            let mut access = Access::NonSequential;
            for index in 0..8 {
                if register_list.is_bit_on(index) {
                    let value = bus.read_word(address, access);
                    self.write_register(usize::from(index), value);
                    address = address.wrapping_add(4);
                    access = Access::Sequential;
                }
            }
            if pc_lr {
                let value = bus.read_word(address, access);
                self.jump(value);
                address = address.wrapping_add(4);
                advance = false;
            }
            bus.idle(1);
            self.write_register(REG_SP, address);
        } else {
            // PUSH pre-decrements.
            let base = sp.wrapping_sub(count * 4);
            let mut address = base & !3;
            let mut access = Access::NonSequential;
            for index in 0..8 {
                if register_list.is_bit_on(index) {
                    bus.write_word(address, self.read_register(usize::from(index)), access);
                    address = address.wrapping_add(4);
                    access = Access::Sequential;
                }
            }
            if pc_lr {
                bus.write_word(address, self.read_register(REG_LR), access);
            }
            self.write_register(REG_SP, base);
        }
        advance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::psr::CpuState;

    fn thumb_cpu_and_bus() -> (Arm7tdmi, Bus) {
        let mut cpu = Arm7tdmi::default();
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        (cpu, Bus::default())
    }

    fn execute(cpu: &mut Arm7tdmi, bus: &mut Bus, op_code: u16) -> bool {
        cpu.execute_thumb(ThumbModeOpcode::from(op_code), bus)
    }

    #[test]
    fn mov_add_sub_immediates() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();

        execute(&mut cpu, &mut bus, 0x232A); // MOV r3, #42
        assert_eq!(cpu.registers.register_at(3), 42);

        execute(&mut cpu, &mut bus, 0x3305); // ADD r3, #5
        assert_eq!(cpu.registers.register_at(3), 47);

        execute(&mut cpu, &mut bus, 0x3B2F); // SUB r3, #47
        assert_eq!(cpu.registers.register_at(3), 0);
        assert!(cpu.cpsr.zero_flag());
    }

    #[test]
    fn alu_shift_by_register() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();
        cpu.registers.set_register_at(0, 1);
        cpu.registers.set_register_at(1, 4);

        execute(&mut cpu, &mut bus, 0x4088); // LSL r0, r1
        assert_eq!(cpu.registers.register_at(0), 16);
    }

    #[test]
    fn push_pop_round_trip() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();
        cpu.registers.set_register_at(REG_SP, 0x0300_1000);
        cpu.registers.set_register_at(0, 0xAA);
        cpu.registers.set_register_at(14, 0x0800_0101);

        execute(&mut cpu, &mut bus, 0xB501); // PUSH {r0, lr}
        assert_eq!(cpu.registers.register_at(REG_SP), 0x0300_0FF8);

        cpu.registers.set_register_at(0, 0);
        let advance = execute(&mut cpu, &mut bus, 0xBD01); // POP {r0, pc}

        assert!(!advance);
        assert_eq!(cpu.registers.register_at(0), 0xAA);
        assert_eq!(cpu.registers.register_at(REG_SP), 0x0300_1000);
        assert_eq!(cpu.registers.program_counter(), 0x0800_0100);
    }

    #[test]
    fn conditional_branch_considers_flags() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();
        cpu.registers.set_program_counter(0x0800_0000);

        // BNE +4 with Z set: falls through.
        cpu.cpsr.set_zero_flag(true);
        assert!(execute(&mut cpu, &mut bus, 0xD102));

        // BEQ +4 with Z set: taken relative to PC+4.
        assert!(!execute(&mut cpu, &mut bus, 0xD002));
        assert_eq!(cpu.registers.program_counter(), 0x0800_0008);
    }

    #[test]
    fn long_branch_with_link_pair() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();
        cpu.registers.set_program_counter(0x0800_0000);

        // BL +0x40: high part then low part.
        execute(&mut cpu, &mut bus, 0xF000); // offset high = 0
        cpu.registers.advance_program_counter(2);
        execute(&mut cpu, &mut bus, 0xF820); // offset low = 0x20

        assert_eq!(cpu.registers.program_counter(), 0x0800_0044);
        assert_eq!(cpu.registers.register_at(REG_LR), 0x0800_0005);
    }

    #[test]
    fn hi_register_add_to_pc_jumps() {
        let (mut cpu, mut bus) = thumb_cpu_and_bus();
        cpu.registers.set_program_counter(0x0800_0000);
        cpu.registers.set_register_at(0, 0x10);

        // ADD pc, r0
        assert!(!execute(&mut cpu, &mut bus, 0x4487));
        assert_eq!(cpu.registers.program_counter(), 0x0800_0014);
    }
}
