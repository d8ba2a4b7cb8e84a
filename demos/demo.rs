use std::io::Read;

use libc::sbrk;
use rallocator::{allocate, free, num_allocated_blocks, num_free_blocks, num_free_bytes, reallocate};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_counters(label: &str) {
  println!(
    "[{label}] blocks: {} allocated, {} free ({} free bytes)",
    num_allocated_blocks(),
    num_free_blocks(),
    num_free_bytes(),
  );
}

fn main() {
  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 4 bytes and write through the pointer.
    // --------------------------------------------------------------------
    let first = allocate(4);
    println!("\n[1] Allocate 4 bytes -> {:?}", first);
    (first as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written = 0x{:X}", (first as *mut u32).read());
    print_counters("1");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 12 bytes, to show non-power-of-two requests still land
    //    8-aligned.
    // --------------------------------------------------------------------
    let second = allocate(12);
    println!("\n[2] Allocate 12 bytes -> {:?}", second);
    std::ptr::write_bytes(second, 0xAB, 12);
    println!("[2] addr % 8 = {}", (second as usize) % 8);
    print_counters("2");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free the first block, then request a smaller size: the arena
    //    should reuse the freed block instead of growing the break.
    // --------------------------------------------------------------------
    free(first);
    println!("\n[3] Freed first block at {:?}", first);
    print_counters("3");

    let third = allocate(2);
    println!(
      "[3] Allocate 2 bytes -> {:?} (reused first block? {})",
      third,
      third == first
    );
    print_counters("3 (after reuse)");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow the third block in place via reallocate.
    // --------------------------------------------------------------------
    let grown = reallocate(third, 64);
    println!("\n[4] Reallocate to 64 bytes -> {:?} (same pointer? {})", grown, grown == third);
    print_counters("4");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Allocate a large (256 KiB) block to observe it bypass the arena.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocate(256 * 1024);
    println!("\n[5] Allocate 256 KiB -> {:?}", big);
    print_program_break("after large alloc");
    print_counters("5");

    free(big);
    println!("[5] Freed the large block; its mapping is unmapped immediately.");
    block_until_enter_pressed();

    println!("\n[6] End of demo. Process will exit and the OS will reclaim everything else.");
  }
}
