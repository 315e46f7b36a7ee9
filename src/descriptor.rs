//! Method descriptor utilities.
//!
//! A JVM method descriptor looks like `(IJLjava/lang/String;[D)V`. The
//! rewriter needs slot arithmetic from it: how wide each parameter is,
//! how wide the return value is, and where the first free local slot sits.

use crate::error::DescriptorError;

/// Parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    params: Vec<ParamType>,
    ret: ReturnType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamType {
    /// Raw type text as it appears in the descriptor, e.g. `I` or
    /// `Ljava/lang/String;` or `[[J`.
    pub text: String,
    /// Operand slots the type occupies: 2 for `J` and `D`, 1 otherwise.
    pub slots: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    /// Non-void return with its slot width (1 or 2).
    Value { text: String, slots: u16 },
}

impl MethodDescriptor {
    pub fn parse(desc: &str) -> Result<Self, DescriptorError> {
        let bytes = desc.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(DescriptorError(desc.to_string()));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        loop {
            if pos >= bytes.len() {
                return Err(DescriptorError(desc.to_string()));
            }
            if bytes[pos] == b')' {
                pos += 1;
                break;
            }
            let start = pos;
            pos = scan_field_type(desc, pos)?;
            let text = desc[start..pos].to_string();
            let slots = type_slots(&text);
            params.push(ParamType { text, slots });
        }
        let ret = match bytes.get(pos) {
            Some(b'V') if pos + 1 == bytes.len() => ReturnType::Void,
            Some(_) => {
                let end = scan_field_type(desc, pos)?;
                if end != bytes.len() {
                    return Err(DescriptorError(desc.to_string()));
                }
                let text = desc[pos..end].to_string();
                let slots = type_slots(&text);
                ReturnType::Value { text, slots }
            }
            None => return Err(DescriptorError(desc.to_string())),
        };
        Ok(Self { params, ret })
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Slot widths of the parameters, in declaration order.
    pub fn param_slot_widths(&self) -> Vec<u16> {
        self.params.iter().map(|p| p.slots).collect()
    }

    /// Total operand slots the parameters occupy.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| p.slots).sum()
    }

    /// Slot width of the return value; 0 for `void`.
    pub fn return_slots(&self) -> u16 {
        match &self.ret {
            ReturnType::Void => 0,
            ReturnType::Value { slots, .. } => *slots,
        }
    }

    pub fn return_type(&self) -> &ReturnType {
        &self.ret
    }

    /// First local slot not claimed by the receiver or a parameter.
    ///
    /// Instance methods reserve slot 0 for `this`.
    pub fn first_free_local(&self, is_static: bool) -> u16 {
        let this = if is_static { 0 } else { 1 };
        this + self.param_slots()
    }
}

fn type_slots(text: &str) -> u16 {
    match text {
        "J" | "D" => 2,
        _ => 1,
    }
}

/// Advances past one field type starting at `pos`, returning the index one
/// past its end.
fn scan_field_type(desc: &str, mut pos: usize) -> Result<usize, DescriptorError> {
    let bytes = desc.as_bytes();
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }
    match bytes.get(pos) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => Ok(pos + 1),
        Some(b'L') => {
            let semi = desc[pos..]
                .find(';')
                .ok_or_else(|| DescriptorError(desc.to_string()))?;
            if semi == 1 {
                // "L;" has no class name
                return Err(DescriptorError(desc.to_string()));
            }
            Ok(pos + semi + 1)
        }
        _ => Err(DescriptorError(desc.to_string())),
    }
}
