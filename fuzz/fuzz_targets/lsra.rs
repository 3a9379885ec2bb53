#![no_main]
use libfuzzer_sys::fuzz_target;

use jitc::{self, test_framework as ir};
use jitcore;

static mut COUNTER_GEN: usize = 0;
static mut COUNTER_OK: usize = 0;

fuzz_target!(|prog: ir::Program| {
    let (num_gen, num_ok) = unsafe {
        COUNTER_GEN += 1;
        (COUNTER_GEN, COUNTER_OK)
    };

    println!(
        "=== status: #ok/#total: {}/{} == {} ",
        num_ok,
        num_gen,
        100.0 * (num_ok as f64) / (num_gen as f64)
    );

    let reg_file = jitcore::make_register_file(jitc::fuzzing::NUM_FUZZ_REGS);
    match ir::run_program(&prog, &reg_file, true) {
        Ok(_) => unsafe {
            COUNTER_OK += 1;
        },
        Err(err) => {
            if err.starts_with("allocation checker") {
                let mut rendered = String::new();
                prog.render("program:", &mut rendered).unwrap();
                println!("{}", rendered);

                panic!("lsra: checker error: {}", err);
            }
            println!("allocation error: {}", err);
        }
    }
});
