#![no_std]

pub mod cmdline;
pub mod console;
pub mod storage;
