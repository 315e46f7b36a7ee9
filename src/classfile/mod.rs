//! Class file parsing, editing and serialization.
//!
//! The model is deliberately shallow: the instrumentation pass only needs to
//! understand `Code` and the attributes whose contents hold bytecode offsets
//! (`StackMapTable`, `LineNumberTable`, `LocalVariableTable`,
//! `LocalVariableTypeTable`). Every other attribute is carried as raw named
//! bytes and written back verbatim, so a class that is parsed and serialized
//! without edits round-trips byte for byte.

pub mod code;

use crate::error::ClassFileError;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

/// Field or method entry; both have the same shape.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    /// Raw modified-UTF-8 bytes, kept unconverted so writing is exact.
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl ConstantPool {
    /// Empty pool; slot 0 is always unusable.
    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(bytes) => {
                std::str::from_utf8(bytes).map_err(|_| ClassFileError::InvalidUtf8)
            }
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Class name of a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    fn push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        // The pool count is a u16 and Long/Double burn a phantom slot, so
        // the entry vector itself can never grow past 0xFFFF.
        let wide = matches!(entry, CpInfo::Long(_) | CpInfo::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > 0xFFFF {
            return Err(ClassFileError::ConstantPoolFull);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index)
    }

    fn find(&self, entry: &CpInfo) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| e.as_ref() == Some(entry))
            .map(|i| i as u16)
    }

    fn intern(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        match self.find(&entry) {
            Some(i) => Ok(i),
            None => self.push(entry),
        }
    }

    pub fn utf8(&mut self, s: &str) -> Result<u16, ClassFileError> {
        self.intern(CpInfo::Utf8(s.as_bytes().to_vec()))
    }

    pub fn integer(&mut self, v: i32) -> Result<u16, ClassFileError> {
        self.intern(CpInfo::Integer(v))
    }

    pub fn class(&mut self, name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        self.intern(CpInfo::Class { name_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn methodref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassFileError> {
        let class_index = self.class(class)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(CpInfo::Methodref { class_index, name_and_type_index })
    }
}

/// One attribute. The name index is kept so serialization never has to
/// re-intern attribute names.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name_index: u16,
    pub body: AttrBody,
}

#[derive(Debug, Clone)]
pub enum AttrBody {
    Code(CodeAttribute),
    StackMapTable(Vec<StackMapFrame>),
    LineNumberTable(Vec<LineNumberEntry>),
    LocalVariableTable(Vec<LocalVariableEntry>),
    LocalVariableTypeTable(Vec<LocalVariableEntry>),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationType },
    Chop { offset_delta: u16, k: u8 },
    SameExtended { offset_delta: u16 },
    Append { offset_delta: u16, locals: Vec<VerificationType> },
    Full { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

/// Entry of `LocalVariableTable` or `LocalVariableTypeTable`; the two
/// tables share a layout (the fourth field is a descriptor index in one and
/// a signature index in the other).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub type_index: u16,
    pub index: u16,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        if self.remaining() < 1 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        if self.remaining() < 2 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        if self.remaining() < 4 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != 0xCAFEBABE {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = parse_constant_pool(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.read_u2()?);
        }

        let fields_count = r.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(parse_member(&mut r, &constant_pool)?);
        }

        let methods_count = r.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(parse_member(&mut r, &constant_pool)?);
        }

        let attributes = parse_attributes(&mut r, &constant_pool)?;
        if r.remaining() != 0 {
            return Err(ClassFileError::InvalidAttribute("trailing bytes".to_string()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Name of this class in internal form (`java/lang/String`).
    pub fn this_class_name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(1024);
        write_u4(&mut w, 0xCAFEBABE);
        write_u2(&mut w, self.minor_version);
        write_u2(&mut w, self.major_version);
        write_constant_pool(&mut w, &self.constant_pool);
        write_u2(&mut w, self.access_flags);
        write_u2(&mut w, self.this_class);
        write_u2(&mut w, self.super_class);
        write_u2(&mut w, self.interfaces.len() as u16);
        for i in &self.interfaces {
            write_u2(&mut w, *i);
        }
        write_u2(&mut w, self.fields.len() as u16);
        for f in &self.fields {
            write_member(&mut w, f);
        }
        write_u2(&mut w, self.methods.len() as u16);
        for m in &self.methods {
            write_member(&mut w, m);
        }
        write_attributes(&mut w, &self.attributes);
        w
    }
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
    entries.push(None); // index 0 is unused

    let mut i = 1;
    while i < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let len = r.read_u2()? as usize;
                CpInfo::Utf8(r.read_bytes(len)?.to_vec())
            }
            3 => CpInfo::Integer(r.read_u4()? as i32),
            4 => CpInfo::Float(r.read_u4()?),
            5 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                entries.push(Some(CpInfo::Long(((high << 32) | low) as i64)));
                entries.push(None);
                i += 2;
                continue;
            }
            6 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                entries.push(Some(CpInfo::Double((high << 32) | low)));
                entries.push(None);
                i += 2;
                continue;
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };

        entries.push(Some(entry));
        i += 1;
    }

    Ok(ConstantPool { entries })
}

fn parse_member(r: &mut Reader, cp: &ConstantPool) -> Result<MemberInfo, ClassFileError> {
    let access_flags = r.read_u2()?;
    let name_index = r.read_u2()?;
    let descriptor_index = r.read_u2()?;
    let attributes = parse_attributes(r, cp)?;
    Ok(MemberInfo { access_flags, name_index, descriptor_index, attributes })
}

fn parse_attributes(r: &mut Reader, cp: &ConstantPool) -> Result<Vec<Attribute>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let name = cp.get_utf8(name_index)?;
        let info_bytes = r.read_bytes(length)?;
        let mut sub = Reader::new(info_bytes);

        let body = match name {
            "Code" => AttrBody::Code(parse_code_attribute(&mut sub, cp)?),
            "StackMapTable" => AttrBody::StackMapTable(parse_stack_map_table(&mut sub)?),
            "LineNumberTable" => {
                let num = sub.read_u2()? as usize;
                let mut entries = Vec::with_capacity(num);
                for _ in 0..num {
                    entries.push(LineNumberEntry {
                        start_pc: sub.read_u2()?,
                        line_number: sub.read_u2()?,
                    });
                }
                AttrBody::LineNumberTable(entries)
            }
            "LocalVariableTable" | "LocalVariableTypeTable" => {
                let num = sub.read_u2()? as usize;
                let mut entries = Vec::with_capacity(num);
                for _ in 0..num {
                    entries.push(LocalVariableEntry {
                        start_pc: sub.read_u2()?,
                        length: sub.read_u2()?,
                        name_index: sub.read_u2()?,
                        type_index: sub.read_u2()?,
                        index: sub.read_u2()?,
                    });
                }
                if name == "LocalVariableTable" {
                    AttrBody::LocalVariableTable(entries)
                } else {
                    AttrBody::LocalVariableTypeTable(entries)
                }
            }
            _ => {
                let _ = sub.read_bytes(sub.remaining())?;
                AttrBody::Raw(info_bytes.to_vec())
            }
        };

        if sub.remaining() != 0 {
            return Err(ClassFileError::InvalidAttribute(name.to_string()));
        }

        attrs.push(Attribute { name_index, body });
    }
    Ok(attrs)
}

fn parse_code_attribute(r: &mut Reader, cp: &ConstantPool) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.read_u2()?;
    let max_locals = r.read_u2()?;
    let code_length = r.read_u4()? as usize;
    let code = r.read_bytes(code_length)?.to_vec();
    let exception_table_length = r.read_u2()? as usize;
    let mut exception_table = Vec::with_capacity(exception_table_length);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: r.read_u2()?,
            end_pc: r.read_u2()?,
            handler_pc: r.read_u2()?,
            catch_type: r.read_u2()?,
        });
    }
    let attributes = parse_attributes(r, cp)?;
    Ok(CodeAttribute { max_stack, max_locals, code, exception_table, attributes })
}

fn parse_stack_map_table(r: &mut Reader) -> Result<Vec<StackMapFrame>, ClassFileError> {
    let num = r.read_u2()? as usize;
    let mut entries = Vec::with_capacity(num);
    for _ in 0..num {
        let frame_type = r.read_u1()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => {
                let stack = parse_verification_type(r)?;
                StackMapFrame::SameLocals1StackItem { offset_delta: (frame_type - 64) as u16, stack }
            }
            247 => {
                let offset_delta = r.read_u2()?;
                let stack = parse_verification_type(r)?;
                StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack }
            }
            248..=250 => {
                let offset_delta = r.read_u2()?;
                StackMapFrame::Chop { offset_delta, k: 251u8 - frame_type }
            }
            251 => {
                let offset_delta = r.read_u2()?;
                StackMapFrame::SameExtended { offset_delta }
            }
            252..=254 => {
                let offset_delta = r.read_u2()?;
                let count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(count);
                for _ in 0..count {
                    locals.push(parse_verification_type(r)?);
                }
                StackMapFrame::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = r.read_u2()?;
                let num_locals = r.read_u2()? as usize;
                let mut locals = Vec::with_capacity(num_locals);
                for _ in 0..num_locals {
                    locals.push(parse_verification_type(r)?);
                }
                let num_stack = r.read_u2()? as usize;
                let mut stack = Vec::with_capacity(num_stack);
                for _ in 0..num_stack {
                    stack.push(parse_verification_type(r)?);
                }
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
        };
        entries.push(frame);
    }
    Ok(entries)
}

fn parse_verification_type(r: &mut Reader) -> Result<VerificationType, ClassFileError> {
    let tag = r.read_u1()?;
    let info = match tag {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(r.read_u2()?),
        8 => VerificationType::Uninitialized(r.read_u2()?),
        _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
    };
    Ok(info)
}

pub(crate) fn write_u1(w: &mut Vec<u8>, v: u8) {
    w.push(v);
}

pub(crate) fn write_u2(w: &mut Vec<u8>, v: u16) {
    w.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn write_u4(w: &mut Vec<u8>, v: u32) {
    w.extend_from_slice(&v.to_be_bytes());
}

fn write_constant_pool(w: &mut Vec<u8>, cp: &ConstantPool) {
    write_u2(w, cp.entries.len() as u16);
    for entry in cp.entries.iter().flatten() {
        match entry {
            CpInfo::Utf8(bytes) => {
                write_u1(w, 1);
                write_u2(w, bytes.len() as u16);
                w.extend_from_slice(bytes);
            }
            CpInfo::Integer(v) => {
                write_u1(w, 3);
                write_u4(w, *v as u32);
            }
            CpInfo::Float(bits) => {
                write_u1(w, 4);
                write_u4(w, *bits);
            }
            CpInfo::Long(v) => {
                write_u1(w, 5);
                let bits = *v as u64;
                write_u4(w, (bits >> 32) as u32);
                write_u4(w, bits as u32);
            }
            CpInfo::Double(bits) => {
                write_u1(w, 6);
                write_u4(w, (bits >> 32) as u32);
                write_u4(w, *bits as u32);
            }
            CpInfo::Class { name_index } => {
                write_u1(w, 7);
                write_u2(w, *name_index);
            }
            CpInfo::String { string_index } => {
                write_u1(w, 8);
                write_u2(w, *string_index);
            }
            CpInfo::Fieldref { class_index, name_and_type_index } => {
                write_u1(w, 9);
                write_u2(w, *class_index);
                write_u2(w, *name_and_type_index);
            }
            CpInfo::Methodref { class_index, name_and_type_index } => {
                write_u1(w, 10);
                write_u2(w, *class_index);
                write_u2(w, *name_and_type_index);
            }
            CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                write_u1(w, 11);
                write_u2(w, *class_index);
                write_u2(w, *name_and_type_index);
            }
            CpInfo::NameAndType { name_index, descriptor_index } => {
                write_u1(w, 12);
                write_u2(w, *name_index);
                write_u2(w, *descriptor_index);
            }
            CpInfo::MethodHandle { reference_kind, reference_index } => {
                write_u1(w, 15);
                write_u1(w, *reference_kind);
                write_u2(w, *reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                write_u1(w, 16);
                write_u2(w, *descriptor_index);
            }
            CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                write_u1(w, 17);
                write_u2(w, *bootstrap_method_attr_index);
                write_u2(w, *name_and_type_index);
            }
            CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                write_u1(w, 18);
                write_u2(w, *bootstrap_method_attr_index);
                write_u2(w, *name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                write_u1(w, 19);
                write_u2(w, *name_index);
            }
            CpInfo::Package { name_index } => {
                write_u1(w, 20);
                write_u2(w, *name_index);
            }
        }
    }
}

fn write_member(w: &mut Vec<u8>, m: &MemberInfo) {
    write_u2(w, m.access_flags);
    write_u2(w, m.name_index);
    write_u2(w, m.descriptor_index);
    write_attributes(w, &m.attributes);
}

fn write_attributes(w: &mut Vec<u8>, attrs: &[Attribute]) {
    write_u2(w, attrs.len() as u16);
    for attr in attrs {
        write_u2(w, attr.name_index);
        let body = write_attr_body(&attr.body);
        write_u4(w, body.len() as u32);
        w.extend_from_slice(&body);
    }
}

fn write_attr_body(body: &AttrBody) -> Vec<u8> {
    let mut w = Vec::new();
    match body {
        AttrBody::Code(code) => {
            write_u2(&mut w, code.max_stack);
            write_u2(&mut w, code.max_locals);
            write_u4(&mut w, code.code.len() as u32);
            w.extend_from_slice(&code.code);
            write_u2(&mut w, code.exception_table.len() as u16);
            for e in &code.exception_table {
                write_u2(&mut w, e.start_pc);
                write_u2(&mut w, e.end_pc);
                write_u2(&mut w, e.handler_pc);
                write_u2(&mut w, e.catch_type);
            }
            write_attributes(&mut w, &code.attributes);
        }
        AttrBody::StackMapTable(frames) => {
            write_u2(&mut w, frames.len() as u16);
            for frame in frames {
                write_stack_map_frame(&mut w, frame);
            }
        }
        AttrBody::LineNumberTable(entries) => {
            write_u2(&mut w, entries.len() as u16);
            for e in entries {
                write_u2(&mut w, e.start_pc);
                write_u2(&mut w, e.line_number);
            }
        }
        AttrBody::LocalVariableTable(entries) | AttrBody::LocalVariableTypeTable(entries) => {
            write_u2(&mut w, entries.len() as u16);
            for e in entries {
                write_u2(&mut w, e.start_pc);
                write_u2(&mut w, e.length);
                write_u2(&mut w, e.name_index);
                write_u2(&mut w, e.type_index);
                write_u2(&mut w, e.index);
            }
        }
        AttrBody::Raw(bytes) => {
            w.extend_from_slice(bytes);
        }
    }
    w
}

fn write_stack_map_frame(w: &mut Vec<u8>, frame: &StackMapFrame) {
    match frame {
        StackMapFrame::Same { offset_delta } => {
            debug_assert!(*offset_delta <= 63);
            write_u1(w, *offset_delta as u8);
        }
        StackMapFrame::SameLocals1StackItem { offset_delta, stack } => {
            debug_assert!(*offset_delta <= 63);
            write_u1(w, 64 + *offset_delta as u8);
            write_verification_type(w, stack);
        }
        StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
            write_u1(w, 247);
            write_u2(w, *offset_delta);
            write_verification_type(w, stack);
        }
        StackMapFrame::Chop { offset_delta, k } => {
            write_u1(w, 251 - k);
            write_u2(w, *offset_delta);
        }
        StackMapFrame::SameExtended { offset_delta } => {
            write_u1(w, 251);
            write_u2(w, *offset_delta);
        }
        StackMapFrame::Append { offset_delta, locals } => {
            write_u1(w, 251 + locals.len() as u8);
            write_u2(w, *offset_delta);
            for l in locals {
                write_verification_type(w, l);
            }
        }
        StackMapFrame::Full { offset_delta, locals, stack } => {
            write_u1(w, 255);
            write_u2(w, *offset_delta);
            write_u2(w, locals.len() as u16);
            for l in locals {
                write_verification_type(w, l);
            }
            write_u2(w, stack.len() as u16);
            for s in stack {
                write_verification_type(w, s);
            }
        }
    }
}

fn write_verification_type(w: &mut Vec<u8>, t: &VerificationType) {
    match t {
        VerificationType::Top => write_u1(w, 0),
        VerificationType::Integer => write_u1(w, 1),
        VerificationType::Float => write_u1(w, 2),
        VerificationType::Double => write_u1(w, 3),
        VerificationType::Long => write_u1(w, 4),
        VerificationType::Null => write_u1(w, 5),
        VerificationType::UninitializedThis => write_u1(w, 6),
        VerificationType::Object(i) => {
            write_u1(w, 7);
            write_u2(w, *i);
        }
        VerificationType::Uninitialized(off) => {
            write_u1(w, 8);
            write_u2(w, *off);
        }
    }
}
