/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Bytecode opcodes, instruction lengths and a checked reader over a method's
//! code.

use smallvec::SmallVec;

use crate::interface::CompileError;

//=============================================================================
// Opcodes

pub const OPC_NOP: u8 = 0x00;
pub const OPC_ACONST_NULL: u8 = 0x01;
pub const OPC_ICONST_M1: u8 = 0x02;
pub const OPC_ICONST_0: u8 = 0x03;
pub const OPC_ICONST_1: u8 = 0x04;
pub const OPC_ICONST_2: u8 = 0x05;
pub const OPC_ICONST_3: u8 = 0x06;
pub const OPC_ICONST_4: u8 = 0x07;
pub const OPC_ICONST_5: u8 = 0x08;
pub const OPC_LCONST_0: u8 = 0x09;
pub const OPC_LCONST_1: u8 = 0x0a;
pub const OPC_FCONST_0: u8 = 0x0b;
pub const OPC_FCONST_1: u8 = 0x0c;
pub const OPC_FCONST_2: u8 = 0x0d;
pub const OPC_DCONST_0: u8 = 0x0e;
pub const OPC_DCONST_1: u8 = 0x0f;
pub const OPC_BIPUSH: u8 = 0x10;
pub const OPC_SIPUSH: u8 = 0x11;
pub const OPC_LDC: u8 = 0x12;
pub const OPC_LDC_W: u8 = 0x13;
pub const OPC_LDC2_W: u8 = 0x14;
pub const OPC_ILOAD: u8 = 0x15;
pub const OPC_LLOAD: u8 = 0x16;
pub const OPC_FLOAD: u8 = 0x17;
pub const OPC_DLOAD: u8 = 0x18;
pub const OPC_ALOAD: u8 = 0x19;
pub const OPC_ILOAD_0: u8 = 0x1a;
pub const OPC_ILOAD_1: u8 = 0x1b;
pub const OPC_ILOAD_2: u8 = 0x1c;
pub const OPC_ILOAD_3: u8 = 0x1d;
pub const OPC_LLOAD_0: u8 = 0x1e;
pub const OPC_LLOAD_1: u8 = 0x1f;
pub const OPC_LLOAD_2: u8 = 0x20;
pub const OPC_LLOAD_3: u8 = 0x21;
pub const OPC_FLOAD_0: u8 = 0x22;
pub const OPC_FLOAD_1: u8 = 0x23;
pub const OPC_FLOAD_2: u8 = 0x24;
pub const OPC_FLOAD_3: u8 = 0x25;
pub const OPC_DLOAD_0: u8 = 0x26;
pub const OPC_DLOAD_1: u8 = 0x27;
pub const OPC_DLOAD_2: u8 = 0x28;
pub const OPC_DLOAD_3: u8 = 0x29;
pub const OPC_ALOAD_0: u8 = 0x2a;
pub const OPC_ALOAD_1: u8 = 0x2b;
pub const OPC_ALOAD_2: u8 = 0x2c;
pub const OPC_ALOAD_3: u8 = 0x2d;
pub const OPC_IALOAD: u8 = 0x2e;
pub const OPC_LALOAD: u8 = 0x2f;
pub const OPC_FALOAD: u8 = 0x30;
pub const OPC_DALOAD: u8 = 0x31;
pub const OPC_AALOAD: u8 = 0x32;
pub const OPC_BALOAD: u8 = 0x33;
pub const OPC_CALOAD: u8 = 0x34;
pub const OPC_SALOAD: u8 = 0x35;
pub const OPC_ISTORE: u8 = 0x36;
pub const OPC_LSTORE: u8 = 0x37;
pub const OPC_FSTORE: u8 = 0x38;
pub const OPC_DSTORE: u8 = 0x39;
pub const OPC_ASTORE: u8 = 0x3a;
pub const OPC_ISTORE_0: u8 = 0x3b;
pub const OPC_ISTORE_1: u8 = 0x3c;
pub const OPC_ISTORE_2: u8 = 0x3d;
pub const OPC_ISTORE_3: u8 = 0x3e;
pub const OPC_LSTORE_0: u8 = 0x3f;
pub const OPC_LSTORE_1: u8 = 0x40;
pub const OPC_LSTORE_2: u8 = 0x41;
pub const OPC_LSTORE_3: u8 = 0x42;
pub const OPC_FSTORE_0: u8 = 0x43;
pub const OPC_FSTORE_1: u8 = 0x44;
pub const OPC_FSTORE_2: u8 = 0x45;
pub const OPC_FSTORE_3: u8 = 0x46;
pub const OPC_DSTORE_0: u8 = 0x47;
pub const OPC_DSTORE_1: u8 = 0x48;
pub const OPC_DSTORE_2: u8 = 0x49;
pub const OPC_DSTORE_3: u8 = 0x4a;
pub const OPC_ASTORE_0: u8 = 0x4b;
pub const OPC_ASTORE_1: u8 = 0x4c;
pub const OPC_ASTORE_2: u8 = 0x4d;
pub const OPC_ASTORE_3: u8 = 0x4e;
pub const OPC_IASTORE: u8 = 0x4f;
pub const OPC_LASTORE: u8 = 0x50;
pub const OPC_FASTORE: u8 = 0x51;
pub const OPC_DASTORE: u8 = 0x52;
pub const OPC_AASTORE: u8 = 0x53;
pub const OPC_BASTORE: u8 = 0x54;
pub const OPC_CASTORE: u8 = 0x55;
pub const OPC_SASTORE: u8 = 0x56;
pub const OPC_POP: u8 = 0x57;
pub const OPC_POP2: u8 = 0x58;
pub const OPC_DUP: u8 = 0x59;
pub const OPC_DUP_X1: u8 = 0x5a;
pub const OPC_DUP_X2: u8 = 0x5b;
pub const OPC_DUP2: u8 = 0x5c;
pub const OPC_DUP2_X1: u8 = 0x5d;
pub const OPC_DUP2_X2: u8 = 0x5e;
pub const OPC_SWAP: u8 = 0x5f;
pub const OPC_IADD: u8 = 0x60;
pub const OPC_LADD: u8 = 0x61;
pub const OPC_FADD: u8 = 0x62;
pub const OPC_DADD: u8 = 0x63;
pub const OPC_ISUB: u8 = 0x64;
pub const OPC_LSUB: u8 = 0x65;
pub const OPC_FSUB: u8 = 0x66;
pub const OPC_DSUB: u8 = 0x67;
pub const OPC_IMUL: u8 = 0x68;
pub const OPC_LMUL: u8 = 0x69;
pub const OPC_FMUL: u8 = 0x6a;
pub const OPC_DMUL: u8 = 0x6b;
pub const OPC_IDIV: u8 = 0x6c;
pub const OPC_LDIV: u8 = 0x6d;
pub const OPC_FDIV: u8 = 0x6e;
pub const OPC_DDIV: u8 = 0x6f;
pub const OPC_IREM: u8 = 0x70;
pub const OPC_LREM: u8 = 0x71;
pub const OPC_FREM: u8 = 0x72;
pub const OPC_DREM: u8 = 0x73;
pub const OPC_INEG: u8 = 0x74;
pub const OPC_LNEG: u8 = 0x75;
pub const OPC_FNEG: u8 = 0x76;
pub const OPC_DNEG: u8 = 0x77;
pub const OPC_ISHL: u8 = 0x78;
pub const OPC_LSHL: u8 = 0x79;
pub const OPC_ISHR: u8 = 0x7a;
pub const OPC_LSHR: u8 = 0x7b;
pub const OPC_IUSHR: u8 = 0x7c;
pub const OPC_LUSHR: u8 = 0x7d;
pub const OPC_IAND: u8 = 0x7e;
pub const OPC_LAND: u8 = 0x7f;
pub const OPC_IOR: u8 = 0x80;
pub const OPC_LOR: u8 = 0x81;
pub const OPC_IXOR: u8 = 0x82;
pub const OPC_LXOR: u8 = 0x83;
pub const OPC_IINC: u8 = 0x84;
pub const OPC_I2L: u8 = 0x85;
pub const OPC_I2F: u8 = 0x86;
pub const OPC_I2D: u8 = 0x87;
pub const OPC_L2I: u8 = 0x88;
pub const OPC_L2F: u8 = 0x89;
pub const OPC_L2D: u8 = 0x8a;
pub const OPC_F2I: u8 = 0x8b;
pub const OPC_F2L: u8 = 0x8c;
pub const OPC_F2D: u8 = 0x8d;
pub const OPC_D2I: u8 = 0x8e;
pub const OPC_D2L: u8 = 0x8f;
pub const OPC_D2F: u8 = 0x90;
pub const OPC_I2B: u8 = 0x91;
pub const OPC_I2C: u8 = 0x92;
pub const OPC_I2S: u8 = 0x93;
pub const OPC_LCMP: u8 = 0x94;
pub const OPC_FCMPL: u8 = 0x95;
pub const OPC_FCMPG: u8 = 0x96;
pub const OPC_DCMPL: u8 = 0x97;
pub const OPC_DCMPG: u8 = 0x98;
pub const OPC_IFEQ: u8 = 0x99;
pub const OPC_IFNE: u8 = 0x9a;
pub const OPC_IFLT: u8 = 0x9b;
pub const OPC_IFGE: u8 = 0x9c;
pub const OPC_IFGT: u8 = 0x9d;
pub const OPC_IFLE: u8 = 0x9e;
pub const OPC_IF_ICMPEQ: u8 = 0x9f;
pub const OPC_IF_ICMPNE: u8 = 0xa0;
pub const OPC_IF_ICMPLT: u8 = 0xa1;
pub const OPC_IF_ICMPGE: u8 = 0xa2;
pub const OPC_IF_ICMPGT: u8 = 0xa3;
pub const OPC_IF_ICMPLE: u8 = 0xa4;
pub const OPC_IF_ACMPEQ: u8 = 0xa5;
pub const OPC_IF_ACMPNE: u8 = 0xa6;
pub const OPC_GOTO: u8 = 0xa7;
pub const OPC_JSR: u8 = 0xa8;
pub const OPC_RET: u8 = 0xa9;
pub const OPC_TABLESWITCH: u8 = 0xaa;
pub const OPC_LOOKUPSWITCH: u8 = 0xab;
pub const OPC_IRETURN: u8 = 0xac;
pub const OPC_LRETURN: u8 = 0xad;
pub const OPC_FRETURN: u8 = 0xae;
pub const OPC_DRETURN: u8 = 0xaf;
pub const OPC_ARETURN: u8 = 0xb0;
pub const OPC_RETURN: u8 = 0xb1;
pub const OPC_GETSTATIC: u8 = 0xb2;
pub const OPC_PUTSTATIC: u8 = 0xb3;
pub const OPC_GETFIELD: u8 = 0xb4;
pub const OPC_PUTFIELD: u8 = 0xb5;
pub const OPC_INVOKEVIRTUAL: u8 = 0xb6;
pub const OPC_INVOKESPECIAL: u8 = 0xb7;
pub const OPC_INVOKESTATIC: u8 = 0xb8;
pub const OPC_INVOKEINTERFACE: u8 = 0xb9;
pub const OPC_INVOKEDYNAMIC: u8 = 0xba;
pub const OPC_NEW: u8 = 0xbb;
pub const OPC_NEWARRAY: u8 = 0xbc;
pub const OPC_ANEWARRAY: u8 = 0xbd;
pub const OPC_ARRAYLENGTH: u8 = 0xbe;
pub const OPC_ATHROW: u8 = 0xbf;
pub const OPC_CHECKCAST: u8 = 0xc0;
pub const OPC_INSTANCEOF: u8 = 0xc1;
pub const OPC_MONITORENTER: u8 = 0xc2;
pub const OPC_MONITOREXIT: u8 = 0xc3;
pub const OPC_WIDE: u8 = 0xc4;
pub const OPC_MULTIANEWARRAY: u8 = 0xc5;
pub const OPC_IFNULL: u8 = 0xc6;
pub const OPC_IFNONNULL: u8 = 0xc7;
pub const OPC_GOTO_W: u8 = 0xc8;
pub const OPC_JSR_W: u8 = 0xc9;

//=============================================================================
// Reading

/// A cursor over the code of a method.  Every read past the end of the code
/// fails with `TruncatedBytecode`.
#[derive(Clone)]
pub struct BytecodeReader<'a> {
  code: &'a [u8],
  pos: usize,
}

impl<'a> BytecodeReader<'a> {
  pub fn new(code: &'a [u8], pos: usize) -> Self {
    Self { code, pos }
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn is_at_end(&self) -> bool {
    self.pos >= self.code.len()
  }

  fn take<const N: usize>(&mut self) -> Result<[u8; N], CompileError> {
    let end = self.pos + N;
    if end > self.code.len() {
      return Err(CompileError::TruncatedBytecode { offset: self.pos as u32 });
    }
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&self.code[self.pos..end]);
    self.pos = end;
    Ok(bytes)
  }

  pub fn read_u8(&mut self) -> Result<u8, CompileError> {
    Ok(self.take::<1>()?[0])
  }

  pub fn read_s8(&mut self) -> Result<i8, CompileError> {
    Ok(self.read_u8()? as i8)
  }

  pub fn read_u16(&mut self) -> Result<u16, CompileError> {
    Ok(u16::from_be_bytes(self.take::<2>()?))
  }

  pub fn read_s16(&mut self) -> Result<i16, CompileError> {
    Ok(i16::from_be_bytes(self.take::<2>()?))
  }

  pub fn read_s32(&mut self) -> Result<i32, CompileError> {
    Ok(i32::from_be_bytes(self.take::<4>()?))
  }

  /// Skips the padding that aligns switch operands to 4 bytes from the start
  /// of the code.
  pub fn skip_switch_padding(&mut self) -> Result<(), CompileError> {
    while self.pos % 4 != 0 {
      self.read_u8()?;
    }
    Ok(())
  }
}

//=============================================================================
// Instruction shapes

/// Length in bytes of the instruction at `offset`, operands included.
pub fn insn_length(code: &[u8], offset: usize) -> Result<usize, CompileError> {
  let truncated = || CompileError::TruncatedBytecode { offset: offset as u32 };
  let opc = *code.get(offset).ok_or_else(truncated)?;
  let len = match opc {
    OPC_BIPUSH | OPC_LDC | OPC_NEWARRAY | OPC_RET => 2,
    OPC_ILOAD..=OPC_ALOAD | OPC_ISTORE..=OPC_ASTORE => 2,
    OPC_SIPUSH | OPC_LDC_W | OPC_LDC2_W | OPC_IINC => 3,
    OPC_IFEQ..=OPC_JSR | OPC_IFNULL | OPC_IFNONNULL => 3,
    OPC_GETSTATIC..=OPC_INVOKESTATIC => 3,
    OPC_NEW | OPC_ANEWARRAY | OPC_CHECKCAST | OPC_INSTANCEOF => 3,
    OPC_MULTIANEWARRAY => 4,
    OPC_INVOKEINTERFACE | OPC_INVOKEDYNAMIC | OPC_GOTO_W | OPC_JSR_W => 5,
    OPC_WIDE => match code.get(offset + 1) {
      Some(&OPC_IINC) => 6,
      Some(_) => 4,
      None => return Err(truncated()),
    },
    OPC_TABLESWITCH => {
      let mut reader = BytecodeReader::new(code, offset + 1);
      reader.skip_switch_padding()?;
      reader.read_s32()?;
      let low = reader.read_s32()?;
      let high = reader.read_s32()?;
      if high < low {
        return Err(truncated());
      }
      let count = (high as i64 - low as i64 + 1) as usize;
      reader.position() - offset + 4 * count
    }
    OPC_LOOKUPSWITCH => {
      let mut reader = BytecodeReader::new(code, offset + 1);
      reader.skip_switch_padding()?;
      reader.read_s32()?;
      let npairs = reader.read_s32()?;
      if npairs < 0 {
        return Err(truncated());
      }
      reader.position() - offset + 8 * npairs as usize
    }
    0..=OPC_JSR_W => 1,
    _ => {
      return Err(CompileError::UnsupportedOpcode {
        opcode: opc,
        offset: offset as u32,
      })
    }
  };
  if offset + len > code.len() {
    return Err(truncated());
  }
  Ok(len)
}

/// Does the instruction end its basic block?
pub fn is_block_terminator(opc: u8) -> bool {
  match opc {
    OPC_IFEQ..=OPC_RETURN => true,
    OPC_ATHROW | OPC_IFNULL | OPC_IFNONNULL | OPC_GOTO_W | OPC_JSR_W => true,
    _ => false,
  }
}

/// Does control continue with the next instruction after this one?
pub fn falls_through(opc: u8) -> bool {
  match opc {
    OPC_GOTO | OPC_GOTO_W | OPC_RET | OPC_TABLESWITCH | OPC_LOOKUPSWITCH => {
      false
    }
    OPC_IRETURN..=OPC_RETURN | OPC_ATHROW => false,
    _ => true,
  }
}

pub fn is_return(opc: u8) -> bool {
  match opc {
    OPC_IRETURN..=OPC_RETURN => true,
    _ => false,
  }
}

/// Absolute offsets the instruction at `offset` may branch to.
pub fn branch_targets(
  code: &[u8], offset: usize,
) -> Result<SmallVec<[u32; 2]>, CompileError> {
  let mut targets = SmallVec::new();
  let mut reader = BytecodeReader::new(code, offset);
  let opc = reader.read_u8()?;
  let base = offset as i64;
  let mut push = |delta: i64| {
    targets.push((base + delta) as u32);
  };
  match opc {
    OPC_IFEQ..=OPC_JSR | OPC_IFNULL | OPC_IFNONNULL => {
      push(reader.read_s16()? as i64)
    }
    OPC_GOTO_W | OPC_JSR_W => push(reader.read_s32()? as i64),
    OPC_TABLESWITCH => {
      reader.skip_switch_padding()?;
      push(reader.read_s32()? as i64);
      let low = reader.read_s32()?;
      let high = reader.read_s32()?;
      for _ in low..=high {
        push(reader.read_s32()? as i64);
      }
    }
    OPC_LOOKUPSWITCH => {
      reader.skip_switch_padding()?;
      push(reader.read_s32()? as i64);
      let npairs = reader.read_s32()?;
      for _ in 0..npairs {
        reader.read_s32()?;
        push(reader.read_s32()? as i64);
      }
    }
    _ => {}
  }
  Ok(targets)
}
