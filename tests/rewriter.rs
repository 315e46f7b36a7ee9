//! End-to-end rewriting of synthesized class files.

use jvmmon::classfile::code::{decode, Insn, OP_INVOKESTATIC, OP_LDC_W};
use jvmmon::classfile::{AttrBody, ClassFile, CodeAttribute};
use jvmmon::profiler::filter::FilterConfig;
use jvmmon::profiler::registry::{ClassState, MethodRegistry};
use jvmmon::profiler::Profiler;
use jvmmon::rewriter::{rewrite_class, RewriteConfig};

struct CpBuilder {
    entries: Vec<Vec<u8>>,
}

impl CpBuilder {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    fn utf8(&mut self, s: &str) -> u16 {
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.push(entry)
    }

    fn class(&mut self, name_index: u16) -> u16 {
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    fn name_and_type(&mut self, name_index: u16, descriptor_index: u16) -> u16 {
        let mut entry = vec![12];
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push(entry)
    }

    fn methodref(&mut self, class_index: u16, name_and_type_index: u16) -> u16 {
        let mut entry = vec![10];
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(entry)
    }
}

fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn code_attr(name_index: u16, max_stack: u16, max_locals: u16, code: &[u8]) -> Vec<u8> {
    let mut info = Vec::new();
    u2(&mut info, max_stack);
    u2(&mut info, max_locals);
    u4(&mut info, code.len() as u32);
    info.extend_from_slice(code);
    u2(&mut info, 0); // exception table
    u2(&mut info, 0); // attributes

    let mut out = Vec::new();
    u2(&mut out, name_index);
    u4(&mut out, info.len() as u32);
    out.extend_from_slice(&info);
    out
}

/// `com/example/Demo` with a constructor, `static int compute(int, int)`
/// and `static int pick(int)` whose goto lands directly on a return.
fn build_demo_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let this_name = cp.utf8("com/example/Demo");
    let this_class = cp.class(this_name);
    let object_name = cp.utf8("java/lang/Object");
    let object_class = cp.class(object_name);
    let init_name = cp.utf8("<init>");
    let void_desc = cp.utf8("()V");
    let init_nat = cp.name_and_type(init_name, void_desc);
    let object_init = cp.methodref(object_class, init_nat);
    let code_name = cp.utf8("Code");
    let compute_name = cp.utf8("compute");
    let compute_desc = cp.utf8("(II)I");
    let pick_name = cp.utf8("pick");
    let pick_desc = cp.utf8("(I)I");

    let mut out = Vec::new();
    u4(&mut out, 0xCAFEBABE);
    u2(&mut out, 0); // minor
    u2(&mut out, 52); // major, Java 8
    u2(&mut out, cp.entries.len() as u16 + 1);
    for entry in &cp.entries {
        out.extend_from_slice(entry);
    }
    u2(&mut out, 0x0021); // ACC_PUBLIC | ACC_SUPER
    u2(&mut out, this_class);
    u2(&mut out, object_class);
    u2(&mut out, 0); // interfaces
    u2(&mut out, 0); // fields

    u2(&mut out, 3); // methods

    // <init>()V: aload_0, invokespecial Object.<init>, return
    u2(&mut out, 0x0001);
    u2(&mut out, init_name);
    u2(&mut out, void_desc);
    u2(&mut out, 1);
    let mut init_code = vec![0x2a, 0xb7];
    init_code.extend_from_slice(&object_init.to_be_bytes());
    init_code.push(0xb1);
    out.extend_from_slice(&code_attr(code_name, 1, 1, &init_code));

    // static compute(II)I: iload_0, iload_1, iadd, ireturn
    u2(&mut out, 0x0009);
    u2(&mut out, compute_name);
    u2(&mut out, compute_desc);
    u2(&mut out, 1);
    out.extend_from_slice(&code_attr(code_name, 2, 2, &[0x1a, 0x1b, 0x60, 0xac]));

    // static pick(I)I: iconst_0, goto 5, nop (dead), ireturn
    u2(&mut out, 0x0009);
    u2(&mut out, pick_name);
    u2(&mut out, pick_desc);
    u2(&mut out, 1);
    out.extend_from_slice(&code_attr(code_name, 1, 1, &[0x03, 0xa7, 0x00, 0x04, 0x00, 0xac]));

    u2(&mut out, 0); // class attributes
    out
}

/// Like [`code_attr`] but with one LocalVariableTable entry attached.
fn code_attr_with_lvt(
    name_index: u16,
    lvt_name: u16,
    max_stack: u16,
    max_locals: u16,
    code: &[u8],
    entry: (u16, u16, u16, u16, u16),
) -> Vec<u8> {
    let mut info = Vec::new();
    u2(&mut info, max_stack);
    u2(&mut info, max_locals);
    u4(&mut info, code.len() as u32);
    info.extend_from_slice(code);
    u2(&mut info, 0); // exception table
    u2(&mut info, 1); // attributes
    u2(&mut info, lvt_name);
    u4(&mut info, 2 + 10);
    u2(&mut info, 1); // one entry
    let (start_pc, length, var_name, var_desc, index) = entry;
    u2(&mut info, start_pc);
    u2(&mut info, length);
    u2(&mut info, var_name);
    u2(&mut info, var_desc);
    u2(&mut info, index);

    let mut out = Vec::new();
    u2(&mut out, name_index);
    u4(&mut out, info.len() as u32);
    out.extend_from_slice(&info);
    out
}

/// Demo variant whose `compute` carries a LocalVariableTable entry with
/// `start_pc + length` past what a u16 can hold.
fn build_overflowing_lvt_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let this_name = cp.utf8("com/example/Demo");
    let this_class = cp.class(this_name);
    let object_name = cp.utf8("java/lang/Object");
    let object_class = cp.class(object_name);
    let code_name = cp.utf8("Code");
    let lvt_name = cp.utf8("LocalVariableTable");
    let compute_name = cp.utf8("compute");
    let compute_desc = cp.utf8("(II)I");
    let pick_name = cp.utf8("pick");
    let pick_desc = cp.utf8("(I)I");
    let var_name = cp.utf8("a");
    let var_desc = cp.utf8("I");

    let mut out = Vec::new();
    u4(&mut out, 0xCAFEBABE);
    u2(&mut out, 0);
    u2(&mut out, 52);
    u2(&mut out, cp.entries.len() as u16 + 1);
    for entry in &cp.entries {
        out.extend_from_slice(entry);
    }
    u2(&mut out, 0x0021);
    u2(&mut out, this_class);
    u2(&mut out, object_class);
    u2(&mut out, 0); // interfaces
    u2(&mut out, 0); // fields

    u2(&mut out, 2); // methods
    u2(&mut out, 0x0009);
    u2(&mut out, compute_name);
    u2(&mut out, compute_desc);
    u2(&mut out, 1);
    out.extend_from_slice(&code_attr_with_lvt(
        code_name,
        lvt_name,
        2,
        2,
        &[0x1a, 0x1b, 0x60, 0xac],
        (3, 0xFFFF, var_name, var_desc, 0),
    ));

    u2(&mut out, 0x0009);
    u2(&mut out, pick_name);
    u2(&mut out, pick_desc);
    u2(&mut out, 1);
    out.extend_from_slice(&code_attr(code_name, 1, 1, &[0x03, 0xac]));

    u2(&mut out, 0); // class attributes
    out
}

/// `com/example/Sleepy` with `static void nap()`: `lconst_0; invokestatic
/// Thread.sleep(J)V; return`, declared max_stack exactly 2 (the long).
fn build_sleepy_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let this_name = cp.utf8("com/example/Sleepy");
    let this_class = cp.class(this_name);
    let object_name = cp.utf8("java/lang/Object");
    let object_class = cp.class(object_name);
    let thread_name = cp.utf8("java/lang/Thread");
    let thread_class = cp.class(thread_name);
    let sleep_name = cp.utf8("sleep");
    let sleep_desc = cp.utf8("(J)V");
    let sleep_nat = cp.name_and_type(sleep_name, sleep_desc);
    let sleep_ref = cp.methodref(thread_class, sleep_nat);
    let code_name = cp.utf8("Code");
    let nap_name = cp.utf8("nap");
    let nap_desc = cp.utf8("()V");

    let mut out = Vec::new();
    u4(&mut out, 0xCAFEBABE);
    u2(&mut out, 0);
    u2(&mut out, 52);
    u2(&mut out, cp.entries.len() as u16 + 1);
    for entry in &cp.entries {
        out.extend_from_slice(entry);
    }
    u2(&mut out, 0x0021);
    u2(&mut out, this_class);
    u2(&mut out, object_class);
    u2(&mut out, 0); // interfaces
    u2(&mut out, 0); // fields

    u2(&mut out, 1); // methods
    u2(&mut out, 0x0009);
    u2(&mut out, nap_name);
    u2(&mut out, nap_desc);
    u2(&mut out, 1);
    let mut nap_code = vec![0x09, 0xb8]; // lconst_0, invokestatic
    nap_code.extend_from_slice(&sleep_ref.to_be_bytes());
    nap_code.push(0xb1); // return
    out.extend_from_slice(&code_attr(code_name, 2, 0, &nap_code));

    u2(&mut out, 0); // class attributes
    out
}

fn method_code<'a>(class: &'a ClassFile, name: &str) -> &'a CodeAttribute {
    let method = class
        .methods
        .iter()
        .find(|m| class.constant_pool.get_utf8(m.name_index).unwrap() == name)
        .unwrap_or_else(|| panic!("no method {name}"));
    method
        .attributes
        .iter()
        .find_map(|a| match &a.body {
            AttrBody::Code(code) => Some(code),
            _ => None,
        })
        .unwrap_or_else(|| panic!("{name} has no Code"))
}

fn everything() -> FilterConfig {
    FilterConfig::new(vec!["com.example.*"], Vec::new()).unwrap()
}

#[test]
fn matching_class_gains_entry_and_exit_probes() {
    let bytes = build_demo_class();
    let registry = MethodRegistry::new();
    let rewritten = rewrite_class(&bytes, &everything(), &registry, &RewriteConfig::default())
        .unwrap()
        .expect("class should be instrumented");

    let class = ClassFile::parse(&rewritten).unwrap();
    let code = method_code(&class, "compute");

    // entry probe first: ldc_w <id> + invokestatic <Probe.enter>
    assert_eq!(code.code[0], OP_LDC_W);
    assert_eq!(code.code[3], OP_INVOKESTATIC);
    assert!(code.code.len() > 4 + 4, "original body must still be there");

    // catch-all tail handler covering the whole original body
    let tail = code.exception_table.last().expect("catch-all entry");
    assert_eq!(tail.catch_type, 0);
    assert_eq!(tail.start_pc, 0);
    assert_eq!(tail.end_pc, tail.handler_pc);

    // probe ids were assigned for both non-constructor methods
    assert_eq!(registry.ids_for_class("com/example/Demo").len(), 2);

    // the probe class is now referenced from the pool
    let needle: &[u8] = b"jvmmon/runtime/Probe";
    assert!(rewritten.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn non_matching_class_is_left_alone() {
    let bytes = build_demo_class();
    let registry = MethodRegistry::new();
    let filter = FilterConfig::new(vec!["org.other.*"], Vec::new()).unwrap();
    let out = rewrite_class(&bytes, &filter, &registry, &RewriteConfig::default()).unwrap();
    assert!(out.is_none());
    assert!(registry.ids_for_class("com/example/Demo").is_empty());
}

#[test]
fn constructor_is_not_instrumented() {
    let bytes = build_demo_class();
    let registry = MethodRegistry::new();
    let rewritten = rewrite_class(&bytes, &everything(), &registry, &RewriteConfig::default())
        .unwrap()
        .unwrap();

    let before = ClassFile::parse(&bytes).unwrap();
    let after = ClassFile::parse(&rewritten).unwrap();
    assert_eq!(method_code(&before, "<init>").code, method_code(&after, "<init>").code);
    assert!(!registry
        .ids_for_class("com/example/Demo")
        .iter()
        .any(|id| registry.key_of(*id).unwrap().name == "<init>"));
}

#[test]
fn branch_to_return_lands_on_the_exit_probe() {
    let bytes = build_demo_class();
    let registry = MethodRegistry::new();
    let rewritten = rewrite_class(&bytes, &everything(), &registry, &RewriteConfig::default())
        .unwrap()
        .unwrap();

    let class = ClassFile::parse(&rewritten).unwrap();
    let code = method_code(&class, "pick");
    let insns = decode(&code.code).unwrap();

    let target = insns
        .iter()
        .find_map(|i| match i.insn {
            Insn::Branch { target, .. } => Some(target),
            _ => None,
        })
        .expect("goto survived rewriting");
    let landed = insns
        .iter()
        .find(|i| i.offset == target)
        .expect("branch target is an instruction start");
    // the goto must reach the exit probe, not jump over it to the return
    assert_eq!(landed.opcode(), OP_LDC_W);
}

#[test]
fn pause_probe_at_full_stack_grows_max_stack() {
    // Thread.sleep(0L) has the 2-slot long live when the pause probe
    // pushes its id, so the declared maximum of 2 is no longer enough.
    let bytes = build_sleepy_class();
    let registry = MethodRegistry::new();
    let rewritten = rewrite_class(&bytes, &everything(), &registry, &RewriteConfig::default())
        .unwrap()
        .expect("class should be instrumented");

    let class = ClassFile::parse(&rewritten).unwrap();
    let code = method_code(&class, "nap");
    assert_eq!(code.max_stack, 3);

    // pause probes really were spliced around the sleep call
    let pause_calls = code
        .code
        .iter()
        .filter(|&&b| b == OP_INVOKESTATIC)
        .count();
    assert!(pause_calls >= 4, "enter, pauseEnter, sleep, pauseExit, exit");
}

#[test]
fn controller_never_instruments_twice() {
    let bytes = build_demo_class();
    let profiler = Profiler::new(RewriteConfig::default());
    profiler
        .configure_filter(vec!["com.example.*"], Vec::new())
        .unwrap();

    let first = profiler.transform("com/example/Demo", &bytes);
    let first = first.expect("first pass instruments");
    assert_eq!(
        profiler.class_state("com/example/Demo"),
        Some(ClassState::Instrumented)
    );

    // a hook replay (e.g. retransform without reset) keeps the original
    assert!(profiler.transform("com/example/Demo", &first).is_none());
    assert!(profiler.transform("com/example/Demo", &bytes).is_none());
}

#[test]
fn overflowing_local_variable_length_skips_only_that_method() {
    let bytes = build_overflowing_lvt_class();
    let registry = MethodRegistry::new();
    let rewritten = rewrite_class(&bytes, &everything(), &registry, &RewriteConfig::default())
        .unwrap()
        .expect("the sibling method still instruments");

    let before = ClassFile::parse(&bytes).unwrap();
    let after = ClassFile::parse(&rewritten).unwrap();
    // the hostile table rejected its method without panicking
    assert_eq!(
        method_code(&before, "compute").code,
        method_code(&after, "compute").code
    );
    assert_eq!(method_code(&after, "pick").code[0], OP_LDC_W);
}

#[test]
fn skipped_class_round_trips_byte_identically() {
    let bytes = build_demo_class();
    let reparsed = ClassFile::parse(&bytes).unwrap().serialize();
    assert_eq!(reparsed, bytes);
}
