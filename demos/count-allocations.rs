use rand::Rng;

use allocated::AllocErrorWithLayout;
use allocated::CountingAllocator;
use allocated::DropIn;

use allocated_avl::{AllocatedAvlTree, Multi};

fn main() -> Result<(), AllocErrorWithLayout> {
    for i in 0..100 {
        let unique_alloc = CountingAllocator::default();
        let mut unique_tree = AllocatedAvlTree::<u32, u32>::new_in(&unique_alloc)?;

        let multi_alloc = CountingAllocator::default();
        let mut multi_tree = AllocatedAvlTree::<u32, u32, Multi>::new_in(&multi_alloc)?;

        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            // a small key space so duplicates are common
            let k: u32 = rng.gen_range(0..500);
            let v: u32 = rng.gen();

            unsafe {
                unique_tree.insert_in(&unique_alloc, k, v)?;
            }
            unsafe {
                multi_tree.insert_in(&multi_alloc, k, v)?;
            }

            println!(
                "{},unique,{},{:?},{},{}",
                i,
                unique_tree.len(),
                unique_tree.height(),
                unique_alloc.n_allocations(),
                unique_alloc.n_bytes_allocated()
            );
            println!(
                "{},multi,{},{:?},{},{}",
                i,
                multi_tree.len(),
                multi_tree.height(),
                multi_alloc.n_allocations(),
                multi_alloc.n_bytes_allocated()
            );
        }

        for _ in 0..500 {
            let k: u32 = rng.gen_range(0..500);

            unsafe {
                unique_tree.remove_in(&unique_alloc, &k);
            }
            unsafe {
                multi_tree.remove_all_in(&multi_alloc, &k);
            }
        }

        unsafe {
            unique_tree.drop_in(&unique_alloc);
        }
        unsafe {
            multi_tree.drop_in(&multi_alloc);
        }

        assert_eq!(unique_alloc.net_allocations(), 0);
        assert_eq!(multi_alloc.net_allocations(), 0);
    }

    Ok(())
}
