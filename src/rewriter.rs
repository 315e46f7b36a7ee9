//! The instrumentation pass.
//!
//! Splices probe calls into every matching method of a class:
//!
//! - a `Probe.enter(I)V` call ahead of the first instruction, placed so a
//!   branch back to offset 0 does not re-enter it;
//! - a `Probe.exit(I)V` call in front of every return, placed so a branch
//!   straight to the return still runs it;
//! - a catch-all handler at the end of the body that calls `Probe.exit`
//!   and rethrows, so exceptional exits are counted too;
//! - optionally `pauseEnter`/`pauseExit` around `Object.wait` and
//!   `Thread.sleep`, and `lockEnter`/`lockExit` around `monitorenter`.
//!
//! The pass is fault-isolated per method: a method the rewriter cannot
//! handle (jsr/ret, a branch pushed out of 16-bit range, odd metadata) is
//! left untouched and logged, and its siblings still get instrumented.
//! Constant pool exhaustion fails the whole class.

use std::collections::HashMap;

use log::{debug, warn};

use crate::classfile::code::{
    self, Insn, OffsetMap, Splice, OP_INVOKESTATIC, OP_INVOKEVIRTUAL, OP_IRETURN, OP_JSR,
    OP_JSR_W, OP_LDC_W, OP_MONITORENTER, OP_RET, OP_RETURN,
};
use crate::classfile::{
    AttrBody, Attribute, ClassFile, CodeAttribute, ConstantPool, CpInfo, ExceptionTableEntry,
    StackMapFrame, VerificationType, ACC_ABSTRACT, ACC_NATIVE, ACC_STATIC,
};
use crate::descriptor::MethodDescriptor;
use crate::error::{ClassFileError, RewriteError};
use crate::profiler::filter::FilterConfig;
use crate::profiler::registry::{MethodKey, MethodRegistry};

/// Class that receives the probe calls, in internal form.
pub const PROBE_CLASS: &str = "jvmmon/runtime/Probe";

pub(crate) const PROBE_ENTER: &str = "enter";
pub(crate) const PROBE_EXIT: &str = "exit";
pub(crate) const PROBE_PAUSE_ENTER: &str = "pauseEnter";
pub(crate) const PROBE_PAUSE_EXIT: &str = "pauseExit";
pub(crate) const PROBE_LOCK_ENTER: &str = "lockEnter";
pub(crate) const PROBE_LOCK_EXIT: &str = "lockExit";
pub(crate) const PROBE_DESC: &str = "(I)V";

// StackMapTable is required from class file version 50 on.
const STACK_MAP_MIN_MAJOR: u16 = 50;

#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub probe_class: String,
    /// Also instrument wait/sleep calls and monitor entry.
    pub track_pauses: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { probe_class: PROBE_CLASS.to_string(), track_pauses: true }
    }
}

/// Rewrites one class. `Ok(None)` means the filter matched no part of the
/// class (or every matching method had to be skipped) and the original
/// bytes should be kept.
pub fn rewrite_class(
    bytes: &[u8],
    filter: &FilterConfig,
    registry: &MethodRegistry,
    config: &RewriteConfig,
) -> Result<Option<Vec<u8>>, RewriteError> {
    let mut class = ClassFile::parse(bytes)?;
    let class_name = class.this_class_name()?.to_string();
    if !filter.matches(&class_name) {
        return Ok(None);
    }

    let major = class.major_version;
    let mut methods = std::mem::take(&mut class.methods);
    let mut changed = false;
    for method in &mut methods {
        let name = class.constant_pool.get_utf8(method.name_index)?.to_string();
        let descriptor = class
            .constant_pool
            .get_utf8(method.descriptor_index)?
            .to_string();
        if method.access_flags & (ACC_ABSTRACT | ACC_NATIVE) != 0 {
            continue;
        }
        // A catch-all handler is illegal while uninitializedThis is live,
        // so constructors and the class initializer stay untouched.
        if name == "<init>" || name == "<clinit>" {
            continue;
        }

        let key = MethodKey {
            class: class_name.clone(),
            name: name.clone(),
            descriptor: descriptor.clone(),
        };
        match instrument_method(&mut class.constant_pool, method, key, major, registry, config) {
            Ok(true) => changed = true,
            Ok(false) => {}
            Err(RewriteError::ClassFile(e @ ClassFileError::ConstantPoolFull)) => {
                return Err(e.into());
            }
            Err(e) => {
                warn!("skipping {class_name}.{name}{descriptor}: {e}");
            }
        }
    }
    class.methods = methods;

    if !changed {
        return Ok(None);
    }
    debug!("instrumented {class_name}");
    Ok(Some(class.serialize()))
}

/// 6-byte probe call: `ldc_w <id>` followed by `invokestatic <method>`.
fn probe_call(id_index: u16, methodref: u16) -> Vec<u8> {
    let id = id_index.to_be_bytes();
    let m = methodref.to_be_bytes();
    vec![OP_LDC_W, id[0], id[1], OP_INVOKESTATIC, m[0], m[1]]
}

fn instrument_method(
    cp: &mut ConstantPool,
    method: &mut crate::classfile::MemberInfo,
    key: MethodKey,
    major: u16,
    registry: &MethodRegistry,
    config: &RewriteConfig,
) -> Result<bool, RewriteError> {
    let Some(code_pos) = method
        .attributes
        .iter()
        .position(|a| matches!(a.body, AttrBody::Code(_)))
    else {
        return Ok(false);
    };

    let desc = MethodDescriptor::parse(&key.descriptor)?;
    let is_static = method.access_flags & ACC_STATIC != 0;

    let AttrBody::Code(code_attr) = &method.attributes[code_pos].body else {
        unreachable!()
    };
    if code_attr.max_locals < desc.first_free_local(is_static) {
        return Err(RewriteError::Unsupported("max_locals below parameter slots"));
    }
    let insns = code::decode(&code_attr.code)?;
    if insns.is_empty() {
        return Err(RewriteError::Unsupported("empty code array"));
    }
    if insns
        .iter()
        .any(|i| matches!(i.opcode(), OP_JSR | OP_JSR_W | OP_RET))
    {
        return Err(RewriteError::Unsupported("jsr/ret subroutines"));
    }

    let id = registry.assign(key);
    let id_index = cp.integer(id as i32)?;
    let enter_ref = cp.methodref(&config.probe_class, PROBE_ENTER, PROBE_DESC)?;
    let exit_ref = cp.methodref(&config.probe_class, PROBE_EXIT, PROBE_DESC)?;
    let throwable_class = cp.class("java/lang/Throwable")?;

    let mut splices: HashMap<usize, Splice> = HashMap::new();
    splices.entry(insns[0].offset).or_default().detached = probe_call(id_index, enter_ref);
    // Pause/lock probes push the id while the original stack is live.
    let mut probe_at_live_stack = false;

    for insn in &insns {
        let opcode = insn.opcode();
        if (OP_IRETURN..=OP_RETURN).contains(&opcode) {
            splices
                .entry(insn.offset)
                .or_default()
                .before
                .extend_from_slice(&probe_call(id_index, exit_ref));
        } else if config.track_pauses && opcode == OP_MONITORENTER {
            let lock_enter = cp.methodref(&config.probe_class, PROBE_LOCK_ENTER, PROBE_DESC)?;
            let lock_exit = cp.methodref(&config.probe_class, PROBE_LOCK_EXIT, PROBE_DESC)?;
            let sp = splices.entry(insn.offset).or_default();
            sp.before.extend_from_slice(&probe_call(id_index, lock_enter));
            sp.after.extend_from_slice(&probe_call(id_index, lock_exit));
            probe_at_live_stack = true;
        } else if config.track_pauses
            && (opcode == OP_INVOKEVIRTUAL || opcode == OP_INVOKESTATIC)
        {
            if let Insn::Plain(bytes) = &insn.insn {
                let index = u16::from_be_bytes([bytes[1], bytes[2]]);
                if is_pause_call(cp, index, opcode) {
                    let pe = cp.methodref(&config.probe_class, PROBE_PAUSE_ENTER, PROBE_DESC)?;
                    let px = cp.methodref(&config.probe_class, PROBE_PAUSE_EXIT, PROBE_DESC)?;
                    let sp = splices.entry(insn.offset).or_default();
                    sp.before.extend_from_slice(&probe_call(id_index, pe));
                    sp.after.extend_from_slice(&probe_call(id_index, px));
                    probe_at_live_stack = true;
                }
            }
        }
    }

    // Exceptional exit: probe, then rethrow.
    let mut tail = probe_call(id_index, exit_ref);
    tail.push(code::OP_ATHROW);

    let AttrBody::Code(code_attr) = &method.attributes[code_pos].body else {
        unreachable!()
    };
    let orig_len = code_attr.code.len();
    let assembled = code::assemble(&insns, &splices, orig_len, &tail)?;
    let handler_pc = u16::try_from(assembled.body_end).map_err(|_| RewriteError::CodeTooLarge)?;

    let mut exception_table = Vec::with_capacity(code_attr.exception_table.len() + 1);
    for e in &code_attr.exception_table {
        exception_table.push(ExceptionTableEntry {
            start_pc: assembled.map.get_u16(e.start_pc)?,
            end_pc: assembled.map.get_u16(e.end_pc)?,
            handler_pc: assembled.map.get_u16(e.handler_pc)?,
            catch_type: e.catch_type,
        });
    }
    // Appended last so existing handlers keep priority.
    exception_table.push(ExceptionTableEntry {
        start_pc: 0,
        end_pc: handler_pc,
        handler_pc,
        catch_type: 0,
    });

    let handler_frame = |prev_abs: Option<usize>| StackMapFrame::Full {
        offset_delta: match prev_abs {
            Some(prev) => (assembled.body_end - prev - 1) as u16,
            None => handler_pc,
        },
        locals: vec![],
        stack: vec![VerificationType::Object(throwable_class)],
    };

    let mut attributes = Vec::with_capacity(code_attr.attributes.len());
    let mut had_stack_map = false;
    for attr in &code_attr.attributes {
        let body = match &attr.body {
            AttrBody::StackMapTable(frames) => {
                had_stack_map = true;
                let mut new_frames = remap_stack_map(frames, &assembled.map)?;
                let prev_abs = absolute_offsets(frames).last().map(|&abs| {
                    // the remapped absolute offset of the last frame
                    assembled.map.get(abs).unwrap_or(abs)
                });
                new_frames.push(handler_frame(prev_abs));
                AttrBody::StackMapTable(new_frames)
            }
            AttrBody::LineNumberTable(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for e in entries {
                    out.push(crate::classfile::LineNumberEntry {
                        start_pc: assembled.map.get_u16(e.start_pc)?,
                        line_number: e.line_number,
                    });
                }
                AttrBody::LineNumberTable(out)
            }
            AttrBody::LocalVariableTable(entries) => {
                AttrBody::LocalVariableTable(remap_local_vars(entries, &assembled.map)?)
            }
            AttrBody::LocalVariableTypeTable(entries) => {
                AttrBody::LocalVariableTypeTable(remap_local_vars(entries, &assembled.map)?)
            }
            AttrBody::Raw(_) => {
                // Type annotation offsets would be stale after the rewrite;
                // the JVM treats the attribute as optional metadata.
                let name = cp.get_utf8(attr.name_index)?;
                if name == "RuntimeVisibleTypeAnnotations"
                    || name == "RuntimeInvisibleTypeAnnotations"
                {
                    continue;
                }
                attr.body.clone()
            }
            AttrBody::Code(_) => attr.body.clone(),
        };
        attributes.push(Attribute { name_index: attr.name_index, body });
    }
    if !had_stack_map && major >= STACK_MAP_MIN_MAJOR {
        attributes.push(Attribute {
            name_index: cp.utf8("StackMapTable")?,
            body: AttrBody::StackMapTable(vec![handler_frame(None)]),
        });
    }

    // The probes push an int id on top of whatever is live; at a return
    // site that is the return value, in the handler it is the throwable.
    // A pause/lock call site can sit at the declared maximum already, so
    // those methods get one extra slot outright.
    let max_stack = if probe_at_live_stack {
        code_attr
            .max_stack
            .checked_add(1)
            .ok_or(RewriteError::CodeTooLarge)?
            .max(2)
    } else {
        code_attr
            .max_stack
            .max(desc.return_slots() + 1)
            .max(2)
    };
    let max_locals = code_attr.max_locals;

    method.attributes[code_pos].body = AttrBody::Code(CodeAttribute {
        max_stack,
        max_locals,
        code: assembled.code,
        exception_table,
        attributes,
    });
    Ok(true)
}

/// True for `java/lang/Object.wait` (invokevirtual) and
/// `java/lang/Thread.sleep` (invokestatic), any overload.
fn is_pause_call(cp: &ConstantPool, index: u16, opcode: u8) -> bool {
    let Ok(CpInfo::Methodref { class_index, name_and_type_index }) = cp.get(index) else {
        return false;
    };
    let Ok(class) = cp.class_name(*class_index) else {
        return false;
    };
    let Ok(CpInfo::NameAndType { name_index, .. }) = cp.get(*name_and_type_index) else {
        return false;
    };
    let Ok(name) = cp.get_utf8(*name_index) else {
        return false;
    };
    match opcode {
        OP_INVOKEVIRTUAL => class == "java/lang/Object" && name == "wait",
        OP_INVOKESTATIC => class == "java/lang/Thread" && name == "sleep",
        _ => false,
    }
}

/// Absolute bytecode offsets described by a frame list. The first frame
/// sits at its delta; every later one at `prev + delta + 1`.
fn absolute_offsets(frames: &[StackMapFrame]) -> Vec<usize> {
    let mut out = Vec::with_capacity(frames.len());
    let mut abs: usize = 0;
    for (i, frame) in frames.iter().enumerate() {
        let delta = frame.offset_delta() as usize;
        abs = if i == 0 { delta } else { abs + delta + 1 };
        out.push(abs);
    }
    out
}

fn remap_stack_map(
    frames: &[StackMapFrame],
    map: &OffsetMap,
) -> Result<Vec<StackMapFrame>, RewriteError> {
    let mut out = Vec::with_capacity(frames.len());
    let mut prev_new: Option<usize> = None;
    for (frame, abs) in frames.iter().zip(absolute_offsets(frames)) {
        let new_abs = map.get(abs)?;
        let delta = match prev_new {
            Some(prev) => new_abs - prev - 1,
            None => new_abs,
        };
        let delta = u16::try_from(delta).map_err(|_| RewriteError::CodeTooLarge)?;
        prev_new = Some(new_abs);

        // Insertions only grow deltas, so compact frames may need the
        // extended form; the reverse never happens.
        let new_frame = match frame {
            StackMapFrame::Same { .. } if delta <= 63 => StackMapFrame::Same { offset_delta: delta },
            StackMapFrame::Same { .. } => StackMapFrame::SameExtended { offset_delta: delta },
            StackMapFrame::SameLocals1StackItem { stack, .. } if delta <= 63 => {
                StackMapFrame::SameLocals1StackItem { offset_delta: delta, stack: stack.clone() }
            }
            StackMapFrame::SameLocals1StackItem { stack, .. } => {
                StackMapFrame::SameLocals1StackItemExtended {
                    offset_delta: delta,
                    stack: stack.clone(),
                }
            }
            StackMapFrame::SameLocals1StackItemExtended { stack, .. } => {
                StackMapFrame::SameLocals1StackItemExtended {
                    offset_delta: delta,
                    stack: stack.clone(),
                }
            }
            StackMapFrame::Chop { k, .. } => StackMapFrame::Chop { offset_delta: delta, k: *k },
            StackMapFrame::SameExtended { .. } => StackMapFrame::SameExtended { offset_delta: delta },
            StackMapFrame::Append { locals, .. } => {
                StackMapFrame::Append { offset_delta: delta, locals: locals.clone() }
            }
            StackMapFrame::Full { locals, stack, .. } => StackMapFrame::Full {
                offset_delta: delta,
                locals: locals.clone(),
                stack: stack.clone(),
            },
        };
        out.push(new_frame);
    }
    Ok(out)
}

fn remap_local_vars(
    entries: &[crate::classfile::LocalVariableEntry],
    map: &OffsetMap,
) -> Result<Vec<crate::classfile::LocalVariableEntry>, RewriteError> {
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        let start = map.get_u16(e.start_pc)?;
        let end_old = usize::from(e.start_pc) + usize::from(e.length);
        let end = u16::try_from(map.get(end_old)?).map_err(|_| RewriteError::CodeTooLarge)?;
        out.push(crate::classfile::LocalVariableEntry {
            start_pc: start,
            length: end - start,
            name_index: e.name_index,
            type_index: e.type_index,
            index: e.index,
        });
    }
    Ok(out)
}
