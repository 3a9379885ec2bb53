/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A small driver around the jit core: compiles a named test case or an
//! interval program file, and prints the resulting allocation.

use std::path::Path;

use jitc::parser;
use jitc::test_cases;
use jitc::test_framework::{
  dump_result, print_result, run_case, TestCase,
};
use jitcore::{make_register_file, RegAllocResult, DEFAULT_NUM_REGS};

use clap;
use log::{error, info};
use pretty_env_logger;

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("jitc")
    .about("compiles test methods and interval programs, and shows the result")
    .arg(
      clap::Arg::new("test")
        .short('t')
        .long("test")
        .takes_value(true)
        .conflicts_with("file")
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("file")
        .short('f')
        .long("file")
        .takes_value(true)
        .help("interval program to allocate"),
    )
    .arg(
      clap::Arg::new("regs")
        .short('r')
        .long("regs")
        .takes_value(true)
        .help("number of registers available (6 if not set)"),
    )
    .arg(
      clap::Arg::new("checker")
        .short('c')
        .long("checker")
        .help("verify the allocation"),
    )
    .arg(
      clap::Arg::new("dump")
        .long("dump")
        .takes_value(true)
        .help("write the allocation to this file, in bincode form"),
    )
    .arg(
      clap::Arg::new("list")
        .short('l')
        .long("list")
        .help("list the test case names"),
    );
  let matches = app.get_matches();

  if matches.is_present("list") {
    for name in test_cases::all_case_names() {
      println!("{}", name);
    }
    return;
  }

  let case = match (matches.value_of("test"), matches.value_of("file")) {
    (Some(name), _) => match test_cases::find_case(name) {
      Ok(case) => case,
      Err(available_names) => {
        error!("can't find test case with name '{}'", name);
        println!("available test cases are:");
        for name in available_names {
          println!("     {}", name);
        }
        return;
      }
    },
    (None, Some(path)) => match parser::parse_file(Path::new(path)) {
      Ok(prog) => TestCase::Program(prog),
      Err(err) => {
        println!("can't parse {}: {}", path, err);
        return;
      }
    },
    (None, None) => {
      println!("either a test case or a file is needed; see --help");
      return;
    }
  };

  let num_regs = match matches.value_of("regs").map(|s| s.parse::<usize>()) {
    None => DEFAULT_NUM_REGS,
    Some(Ok(n)) => n,
    Some(Err(_)) => {
      println!("invalid number of registers");
      return;
    }
  };
  let run_checker = matches.is_present("checker");
  info!(
    "{}: {} register(s), checker {}",
    case.name(),
    num_regs,
    if run_checker { "on" } else { "off" }
  );

  case.print();

  let result = match run_case(&case, num_regs, run_checker) {
    Ok(result) => result,
    Err(err) => {
      println!("compilation failed: {}", err);
      return;
    }
  };

  print_result(&result, &make_register_file(num_regs));

  if let Some(path) = matches.value_of("dump") {
    if let Err(err) = dump_result(&result, Path::new(path)) {
      println!("can't write {}: {}", path, err);
    }
  }
}

#[cfg(test)]
mod test_utils {
  use super::*;

  pub fn run(name: &str, num_regs: usize) -> Result<RegAllocResult, String> {
    let _ = pretty_env_logger::try_init();
    let case = test_cases::find_case(name).unwrap();
    run_case(&case, num_regs, true)
  }

  pub fn check(name: &str, num_regs: usize) {
    if let Err(err) = run(name, num_regs) {
      panic!("{} with {} register(s) failed: {}", name, num_regs, err);
    }
  }
}

#[test]
fn straight_line() {
  assert!(test_utils::run("straight_line", 1).is_err());
  assert!(test_utils::run("straight_line", 2).is_err());
  for i in 3..7 {
    test_utils::check("straight_line", i);
  }
}

#[test]
fn simple_spill() {
  for i in 1..5 {
    test_utils::check("simple_spill", i);
  }
  let result = test_utils::run("simple_spill", 1).unwrap();
  assert_eq!(result.num_spill_slots, 1);
  assert_eq!(result.edits.len(), 2);
}

#[test]
fn pressure() {
  assert!(test_utils::run("pressure", 1).is_err());
  assert!(test_utils::run("pressure", 2).is_err());
  for i in 3..7 {
    test_utils::check("pressure", i);
  }
}

#[test]
fn chain() {
  assert!(test_utils::run("chain", 1).is_err());
  assert!(test_utils::run("chain", 2).is_err());
  for i in 3..8 {
    test_utils::check("chain", i);
  }
}

#[test]
fn array_swap() {
  for i in 1..5 {
    test_utils::check("array_swap", i);
  }
}

#[test]
fn string_const() {
  test_utils::check("string_const", DEFAULT_NUM_REGS);
}

#[test]
fn static_calls() {
  for i in 1..5 {
    test_utils::check("static_calls", i);
  }
}

#[test]
fn objects() {
  test_utils::check("objects", 1);
}

#[test]
fn unknown_case_lists_all() {
  match test_cases::find_case("no_such_case") {
    Err(names) => {
      assert_eq!(names, test_cases::all_case_names());
      assert!(names.iter().any(|n| n == "array_swap"));
    }
    Ok(_) => panic!("found a case that does not exist"),
  }
}
