#![no_main]
use libfuzzer_sys::fuzz_target;

use jitc::fuzzing::{FuzzBytecode, NUM_FUZZ_REGS};
use jitcore::{self, CompileError, RegAllocError};

fuzz_target!(|bytecode: FuzzBytecode| {
    let vm = jitcore::TestVm::new();
    let method = vm.method_with_code(bytecode.code.clone());
    let options = jitcore::Options {
        run_checker: true,
        ..jitcore::Options::with_registers(NUM_FUZZ_REGS)
    };

    match jitcore::compile_method(&method, &vm, &vm, &options) {
        Ok(compiled) => {
            let edits = &compiled.regalloc.edits;
            assert!(edits.windows(2).all(|w| w[0].at <= w[1].at));
            assert!(method.jit.lock().unwrap().is_compiled());
        }
        Err(CompileError::RegAlloc(RegAllocError::Checker(errors))) => {
            println!("code: {:02x?}", bytecode.code);
            panic!("convert: checker error: {}", errors);
        }
        Err(err) => {
            println!("compile error: {}", err);
            assert!(!method.jit.lock().unwrap().is_compiled());
        }
    }
});
