//! Bytecode instruction decoding and reassembly.
//!
//! The instrumentation pass works on a decoded instruction list, splices
//! probe sequences between instructions, and reassembles the stream. All
//! branch targets are kept as absolute original offsets while decoded;
//! reassembly resolves them through an old-to-new offset map and re-pads
//! `tableswitch`/`lookupswitch` to their 4-byte alignment, iterating until
//! the layout stops moving.

use std::collections::HashMap;

use crate::error::RewriteError;

pub const OP_LDC: u8 = 0x12;
pub const OP_LDC_W: u8 = 0x13;
pub const OP_IINC: u8 = 0x84;
pub const OP_IFEQ: u8 = 0x99;
pub const OP_GOTO: u8 = 0xa7;
pub const OP_JSR: u8 = 0xa8;
pub const OP_RET: u8 = 0xa9;
pub const OP_TABLESWITCH: u8 = 0xaa;
pub const OP_LOOKUPSWITCH: u8 = 0xab;
pub const OP_IRETURN: u8 = 0xac;
pub const OP_RETURN: u8 = 0xb1;
pub const OP_INVOKEVIRTUAL: u8 = 0xb6;
pub const OP_INVOKESTATIC: u8 = 0xb8;
pub const OP_ATHROW: u8 = 0xbf;
pub const OP_MONITORENTER: u8 = 0xc2;
pub const OP_WIDE: u8 = 0xc4;
pub const OP_IFNULL: u8 = 0xc6;
pub const OP_IFNONNULL: u8 = 0xc7;
pub const OP_GOTO_W: u8 = 0xc8;
pub const OP_JSR_W: u8 = 0xc9;

/// One decoded instruction. `Plain` carries its full encoding (opcode plus
/// operands); the other variants hold what reassembly must recompute.
#[derive(Debug, Clone)]
pub enum Insn {
    Plain(Vec<u8>),
    /// 16-bit branch: ifeq..jsr, ifnull, ifnonnull.
    Branch { opcode: u8, target: usize },
    /// goto_w / jsr_w.
    BranchWide { opcode: u8, target: usize },
    TableSwitch { default: usize, low: i32, high: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
}

#[derive(Debug, Clone)]
pub struct DecodedInsn {
    pub offset: usize,
    pub insn: Insn,
}

impl DecodedInsn {
    pub fn opcode(&self) -> u8 {
        match &self.insn {
            Insn::Plain(bytes) => bytes[0],
            Insn::Branch { opcode, .. } | Insn::BranchWide { opcode, .. } => *opcode,
            Insn::TableSwitch { .. } => OP_TABLESWITCH,
            Insn::LookupSwitch { .. } => OP_LOOKUPSWITCH,
        }
    }
}

/// Encoded size of the fixed-length opcodes; `None` for variable-length
/// ones (switches, wide) and undefined opcodes.
fn fixed_len(opcode: u8) -> Option<usize> {
    match opcode {
        0x00..=0x0f => Some(1),
        0x10 => Some(2),          // bipush
        0x11 => Some(3),          // sipush
        OP_LDC => Some(2),
        OP_LDC_W | 0x14 => Some(3),
        0x15..=0x19 => Some(2),   // iload..aload
        0x1a..=0x35 => Some(1),
        0x36..=0x3a => Some(2),   // istore..astore
        0x3b..=0x83 => Some(1),
        OP_IINC => Some(3),
        0x85..=0x98 => Some(1),
        OP_RET => Some(2),
        0xac..=0xb1 => Some(1),   // ireturn..return
        0xb2..=0xb8 => Some(3),   // field access, invokevirtual/special/static
        0xb9 | 0xba => Some(5),   // invokeinterface, invokedynamic
        0xbb => Some(3),          // new
        0xbc => Some(2),          // newarray
        0xbd => Some(3),          // anewarray
        0xbe | 0xbf => Some(1),
        0xc0 | 0xc1 => Some(3),   // checkcast, instanceof
        0xc2 | 0xc3 => Some(1),   // monitorenter/exit
        0xc5 => Some(4),          // multianewarray
        _ => None,
    }
}

fn is_branch16(opcode: u8) -> bool {
    (OP_IFEQ..=OP_JSR).contains(&opcode) || opcode == OP_IFNULL || opcode == OP_IFNONNULL
}

pub fn decode(code: &[u8]) -> Result<Vec<DecodedInsn>, RewriteError> {
    let mut insns = Vec::new();
    let mut pos = 0;
    while pos < code.len() {
        let start = pos;
        let opcode = code[pos];
        let insn = if is_branch16(opcode) {
            let disp = read_i2(code, pos + 1)?;
            let target = offset_add(pos, disp as i32)?;
            pos += 3;
            Insn::Branch { opcode, target }
        } else if opcode == OP_GOTO_W || opcode == OP_JSR_W {
            let disp = read_i4(code, pos + 1)?;
            let target = offset_add(pos, disp)?;
            pos += 5;
            Insn::BranchWide { opcode, target }
        } else if opcode == OP_TABLESWITCH {
            let base = pos;
            let mut p = pos + 1 + pad_after(pos);
            let default = offset_add(base, read_i4(code, p)?)?;
            let low = read_i4(code, p + 4)?;
            let high = read_i4(code, p + 8)?;
            p += 12;
            if high < low {
                return Err(RewriteError::UnknownOpcode { opcode, offset: base });
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for i in 0..count {
                targets.push(offset_add(base, read_i4(code, p + i * 4)?)?);
            }
            pos = p + count * 4;
            Insn::TableSwitch { default, low, high, targets }
        } else if opcode == OP_LOOKUPSWITCH {
            let base = pos;
            let mut p = pos + 1 + pad_after(pos);
            let default = offset_add(base, read_i4(code, p)?)?;
            let npairs = read_i4(code, p + 4)?;
            p += 8;
            if npairs < 0 {
                return Err(RewriteError::UnknownOpcode { opcode, offset: base });
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for i in 0..npairs as usize {
                let key = read_i4(code, p + i * 8)?;
                let target = offset_add(base, read_i4(code, p + i * 8 + 4)?)?;
                pairs.push((key, target));
            }
            pos = p + npairs as usize * 8;
            Insn::LookupSwitch { default, pairs }
        } else if opcode == OP_WIDE {
            let modified = *code.get(pos + 1).ok_or(RewriteError::UnknownOpcode {
                opcode,
                offset: pos,
            })?;
            let len = if modified == OP_IINC { 6 } else { 4 };
            let end = pos + len;
            if end > code.len() {
                return Err(RewriteError::UnknownOpcode { opcode, offset: pos });
            }
            let bytes = code[pos..end].to_vec();
            pos = end;
            Insn::Plain(bytes)
        } else {
            let len = fixed_len(opcode).ok_or(RewriteError::UnknownOpcode { opcode, offset: pos })?;
            let end = pos + len;
            if end > code.len() {
                return Err(RewriteError::UnknownOpcode { opcode, offset: pos });
            }
            let bytes = code[pos..end].to_vec();
            pos = end;
            Insn::Plain(bytes)
        };
        insns.push(DecodedInsn { offset: start, insn });
    }
    Ok(insns)
}

/// Encoded length of an instruction if it were placed at `offset`.
fn encoded_len_at(insn: &DecodedInsn, offset: usize) -> usize {
    match &insn.insn {
        Insn::Plain(bytes) => bytes.len(),
        Insn::Branch { .. } => 3,
        Insn::BranchWide { .. } => 5,
        Insn::TableSwitch { targets, .. } => 1 + pad_after(offset) + 12 + targets.len() * 4,
        Insn::LookupSwitch { pairs, .. } => 1 + pad_after(offset) + 8 + pairs.len() * 8,
    }
}

fn pad_after(opcode_offset: usize) -> usize {
    (4 - ((opcode_offset + 1) % 4)) % 4
}

fn read_i2(code: &[u8], pos: usize) -> Result<i16, RewriteError> {
    if pos + 2 > code.len() {
        return Err(RewriteError::UnknownOpcode { opcode: 0, offset: pos });
    }
    Ok(i16::from_be_bytes([code[pos], code[pos + 1]]))
}

fn read_i4(code: &[u8], pos: usize) -> Result<i32, RewriteError> {
    if pos + 4 > code.len() {
        return Err(RewriteError::UnknownOpcode { opcode: 0, offset: pos });
    }
    Ok(i32::from_be_bytes([code[pos], code[pos + 1], code[pos + 2], code[pos + 3]]))
}

fn offset_add(base: usize, disp: i32) -> Result<usize, RewriteError> {
    let v = base as i64 + disp as i64;
    if v < 0 {
        return Err(RewriteError::UnknownOpcode { opcode: 0, offset: base });
    }
    Ok(v as usize)
}

/// An instruction with probe bytes spliced around it.
///
/// Branches to the original instruction land at the start of `before`;
/// `detached` bytes run only when control falls through from the previous
/// instruction (used for the method entry probe, which a loop back to
/// offset 0 must not re-execute). `after` runs on fall-through past the
/// instruction.
#[derive(Debug, Clone, Default)]
pub struct Splice {
    pub detached: Vec<u8>,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

/// Maps original code offsets (instruction starts plus the end-of-code
/// boundary) to offsets in the reassembled stream.
#[derive(Debug)]
pub struct OffsetMap {
    map: HashMap<usize, usize>,
}

impl OffsetMap {
    pub fn get(&self, old: usize) -> Result<usize, RewriteError> {
        self.map
            .get(&old)
            .copied()
            .ok_or(RewriteError::Unsupported("branch into the middle of an instruction"))
    }

    pub fn get_u16(&self, old: u16) -> Result<u16, RewriteError> {
        let v = self.get(old as usize)?;
        u16::try_from(v).map_err(|_| RewriteError::CodeTooLarge)
    }
}

pub struct Assembled {
    pub code: Vec<u8>,
    pub map: OffsetMap,
    /// Offset just past the last instruction's `after` bytes; `tail` bytes
    /// (the exceptional-exit handler) start here.
    pub body_end: usize,
}

/// Reassembles the instruction stream with splices applied and `tail`
/// appended after the body.
pub fn assemble(
    insns: &[DecodedInsn],
    splices: &HashMap<usize, Splice>,
    orig_len: usize,
    tail: &[u8],
) -> Result<Assembled, RewriteError> {
    let empty = Splice::default();

    // Layout pass: switch padding depends on the new offsets, and padding
    // changes move everything after it, so iterate to a fixpoint. Sizes
    // only ever grow or shrink by < 4 bytes per switch, which converges.
    let mut opcode_offsets: Vec<usize> = insns.iter().map(|i| i.offset).collect();
    loop {
        let mut changed = false;
        let mut pos = 0;
        for (idx, insn) in insns.iter().enumerate() {
            let sp = splices.get(&insn.offset).unwrap_or(&empty);
            pos += sp.detached.len() + sp.before.len();
            if opcode_offsets[idx] != pos {
                opcode_offsets[idx] = pos;
                changed = true;
            }
            pos += encoded_len_at(insn, pos);
            pos += sp.after.len();
        }
        if !changed {
            break;
        }
    }

    // Target map: branches land past `detached`, on the probe in `before`.
    let mut map = HashMap::with_capacity(insns.len() + 1);
    let mut body_end = 0;
    for (idx, insn) in insns.iter().enumerate() {
        let sp = splices.get(&insn.offset).unwrap_or(&empty);
        map.insert(insn.offset, opcode_offsets[idx] - sp.before.len());
        body_end = opcode_offsets[idx] + encoded_len_at(insn, opcode_offsets[idx]) + sp.after.len();
    }
    map.insert(orig_len, body_end);
    let map = OffsetMap { map };

    // Emit pass.
    let mut code = Vec::with_capacity(body_end + tail.len());
    for insn in insns {
        let sp = splices.get(&insn.offset).unwrap_or(&empty);
        code.extend_from_slice(&sp.detached);
        code.extend_from_slice(&sp.before);
        let opcode_offset = code.len();
        match &insn.insn {
            Insn::Plain(bytes) => code.extend_from_slice(bytes),
            Insn::Branch { opcode, target } => {
                let disp = map.get(*target)? as i64 - opcode_offset as i64;
                let disp = i16::try_from(disp).map_err(|_| RewriteError::BranchOutOfRange)?;
                code.push(*opcode);
                code.extend_from_slice(&disp.to_be_bytes());
            }
            Insn::BranchWide { opcode, target } => {
                let disp = map.get(*target)? as i64 - opcode_offset as i64;
                let disp = i32::try_from(disp).map_err(|_| RewriteError::BranchOutOfRange)?;
                code.push(*opcode);
                code.extend_from_slice(&disp.to_be_bytes());
            }
            Insn::TableSwitch { default, low, high, targets } => {
                code.push(OP_TABLESWITCH);
                code.resize(code.len() + pad_after(opcode_offset), 0);
                push_switch_disp(&mut code, &map, *default, opcode_offset)?;
                code.extend_from_slice(&low.to_be_bytes());
                code.extend_from_slice(&high.to_be_bytes());
                for t in targets {
                    push_switch_disp(&mut code, &map, *t, opcode_offset)?;
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                code.push(OP_LOOKUPSWITCH);
                code.resize(code.len() + pad_after(opcode_offset), 0);
                push_switch_disp(&mut code, &map, *default, opcode_offset)?;
                code.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
                for (key, t) in pairs {
                    code.extend_from_slice(&key.to_be_bytes());
                    push_switch_disp(&mut code, &map, *t, opcode_offset)?;
                }
            }
        }
        code.extend_from_slice(&sp.after);
    }
    debug_assert_eq!(code.len(), body_end);
    code.extend_from_slice(tail);

    if code.len() > u16::MAX as usize {
        return Err(RewriteError::CodeTooLarge);
    }

    Ok(Assembled { code, map, body_end })
}

fn push_switch_disp(
    code: &mut Vec<u8>,
    map: &OffsetMap,
    target: usize,
    opcode_offset: usize,
) -> Result<(), RewriteError> {
    let disp = map.get(target)? as i64 - opcode_offset as i64;
    let disp = i32::try_from(disp).map_err(|_| RewriteError::BranchOutOfRange)?;
    code.extend_from_slice(&disp.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple_stream() {
        // iconst_0; istore_1; iload_1; ireturn
        let code = [0x03, 0x3c, 0x1b, 0xac];
        let insns = decode(&code).unwrap();
        assert_eq!(insns.len(), 4);
        assert_eq!(insns[0].offset, 0);
        assert_eq!(insns[3].offset, 3);
        assert_eq!(insns[3].opcode(), OP_IRETURN);
    }

    #[test]
    fn decode_branch_resolves_absolute_target() {
        // 0: iload_1; 1: ifeq +5 (-> 6); 4: iconst_1; 5: ireturn; 6: iconst_0; 7: ireturn
        let code = [0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let insns = decode(&code).unwrap();
        match &insns[1].insn {
            Insn::Branch { opcode, target } => {
                assert_eq!(*opcode, OP_IFEQ);
                assert_eq!(*target, 6);
            }
            other => panic!("expected branch, got {other:?}"),
        }
    }

    #[test]
    fn decode_tableswitch_with_padding() {
        // 0: iload_1; 1: tableswitch (pad 2), default +23, low 0, high 1, 2 targets
        let mut code = vec![0x1b, 0xaa, 0, 0];
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&25i32.to_be_bytes());
        code.extend_from_slice(&[0x03, 0xac]); // 24: iconst_0; 25: ireturn
        code.extend_from_slice(&[0x04, 0xac]); // 26: iconst_1; 27: ireturn
        let insns = decode(&code).unwrap();
        match &insns[1].insn {
            Insn::TableSwitch { default, low, high, targets } => {
                assert_eq!(*default, 24);
                assert_eq!((*low, *high), (0, 1));
                assert_eq!(targets, &vec![24, 26]);
            }
            other => panic!("expected tableswitch, got {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let err = decode(&[0xcb]).unwrap_err();
        assert!(matches!(err, RewriteError::UnknownOpcode { opcode: 0xcb, .. }));
    }

    #[test]
    fn assemble_without_splices_round_trips() {
        let code = vec![0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let insns = decode(&code).unwrap();
        let out = assemble(&insns, &HashMap::new(), code.len(), &[]).unwrap();
        assert_eq!(out.code, code);
        assert_eq!(out.map.get(6).unwrap(), 6);
    }

    #[test]
    fn splice_before_captures_branch_target() {
        // branch to the return at 6 must land on the spliced probe
        let code = vec![0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let insns = decode(&code).unwrap();
        let mut splices = HashMap::new();
        splices.insert(6, Splice { before: vec![0x00, 0x00], ..Default::default() });
        let out = assemble(&insns, &splices, code.len(), &[]).unwrap();
        assert_eq!(out.map.get(6).unwrap(), 6);
        assert_eq!(out.map.get(7).unwrap(), 9);
        // the ifeq displacement still points at the probe start
        assert_eq!(&out.code[1..4], &[0x99, 0x00, 0x05]);
    }

    #[test]
    fn splice_detached_is_skipped_by_targets() {
        // goto 0 loops to the original first instruction, past the probe
        let code = vec![0x00, 0xa7, 0xff, 0xff]; // nop; goto -1 -> 0
        let insns = decode(&code).unwrap();
        let mut splices = HashMap::new();
        splices.insert(0, Splice { detached: vec![0x00, 0x00, 0x00], ..Default::default() });
        let out = assemble(&insns, &splices, code.len(), &[]).unwrap();
        assert_eq!(out.map.get(0).unwrap(), 3);
        // goto at new offset 4, displacement -1 to reach offset 3
        assert_eq!(&out.code[4..7], &[0xa7, 0xff, 0xff]);
    }

    #[test]
    fn switch_padding_reflows_to_fixpoint() {
        // tableswitch at offset 1 has 2 pad bytes; a 1-byte splice before
        // it moves it to offset 2 and shrinks the pad to 1.
        let mut code = vec![0x1b, 0xaa, 0, 0];
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&0i32.to_be_bytes());
        code.extend_from_slice(&1i32.to_be_bytes());
        code.extend_from_slice(&23i32.to_be_bytes());
        code.extend_from_slice(&25i32.to_be_bytes());
        code.extend_from_slice(&[0x03, 0xac, 0x04, 0xac]);
        let insns = decode(&code).unwrap();
        let mut splices = HashMap::new();
        splices.insert(1, Splice { before: vec![0x00], ..Default::default() });
        let out = assemble(&insns, &splices, code.len(), &[]).unwrap();
        // one byte added, one pad byte removed: same total length
        assert_eq!(out.code.len(), code.len());
        let insns2 = decode(&out.code).unwrap();
        match &insns2[2].insn {
            Insn::TableSwitch { default, targets, .. } => {
                assert_eq!(*default, out.map.get(24).unwrap());
                assert_eq!(targets[0], out.map.get(24).unwrap());
                assert_eq!(targets[1], out.map.get(26).unwrap());
            }
            other => panic!("expected tableswitch, got {other:?}"),
        }
    }
}
