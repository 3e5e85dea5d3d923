//! Demonstrates the ergonomic wrapper types for AVL trees.
//!
//! This example shows how to use the safe wrapper aliases (`AvlMap` and
//! `AvlMultiSet`) and cursors instead of the lower-level allocated type.

use allocated_avl::{AvlMap, AvlMultiSet};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== AVL Map Demo ===\n");
    map_demo()?;

    println!("\n=== AVL Multiset Demo ===\n");
    multiset_demo()?;

    Ok(())
}

fn map_demo() -> Result<(), Box<dyn std::error::Error>> {
    // Create a new map using the ergonomic wrapper
    let mut map = AvlMap::new();

    // Insert some key-value pairs (no unsafe blocks needed!)
    map.insert(3, "three")?;
    map.insert(1, "one")?;
    map.insert(4, "four")?;
    let (_, inserted) = map.insert(1, "ONE")?; // Existing key is kept
    map.insert(5, "five")?;
    map.insert(9, "nine")?;
    map.insert(2, "two")?;

    println!("Inserted {} items (second insert of 1: {})", map.len(), inserted);
    println!("Height: {:?}", map.height());

    if let Some(value) = map.get(&1) {
        println!("Key 1: {}", value);
    }

    // Iterate over entries (sorted by key)
    println!("\nAll entries:");
    for (k, v) in &map {
        println!("  {} -> {}", k, v);
    }

    // Walk backwards from the end with a cursor
    print!("\nReversed keys: ");
    let mut cursor = map.end();
    cursor.move_prev();
    while let Some(k) = cursor.key() {
        print!("{} ", k);
        cursor.move_prev();
    }
    println!();

    // Insert through a cursor: a good hint skips the descent from the root
    let mut cursor = map.find_mut(&5);
    cursor.insert(6, "six")?;
    println!("\nAfter adding 6 next to 5: {} items", map.len());

    // Range queries use lower/upper bound descents
    println!("\nKeys in 2..=5:");
    for (k, v) in map.range(2..=5) {
        println!("  {} -> {}", k, v);
    }

    // Remove through a cursor
    let mut cursor = map.begin_mut();
    if let Some((k, v)) = cursor.remove_current() {
        println!("\nRemoved first entry: {} -> {}", k, v);
    }

    println!("Final count: {} items", map.len());

    Ok(())
}

fn multiset_demo() -> Result<(), Box<dyn std::error::Error>> {
    let mut words = AvlMultiSet::new();

    for w in "the quick brown fox jumps over the lazy dog the end".split(' ') {
        words.insert(w, ())?;
    }

    println!("{} words, {} copies of 'the'", words.len(), words.count("the"));

    print!("Sorted: ");
    for w in words.keys() {
        print!("{} ", w);
    }
    println!();

    let removed = words.remove_all("the");
    println!("\nRemoved {} copies of 'the', {} words left", removed, words.len());

    words.clear();
    println!("After clear: {} items", words.len());

    Ok(())
}
