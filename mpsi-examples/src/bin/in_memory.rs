//! In-memory walkthrough of a multiparty PSI session.
//!
//! One delegate and two parties run every protocol variant within a single
//! process, stepping through the rounds one at a time.
//!
//! Run with:
//! ```bash
//! cargo run --bin in_memory
//! ```

use mpsi_protocol::{ground_truth, EcGroup, ElGamal, Label, Session, Variant};
use std::sync::Arc;

const N_BITS: u32 = 10;

fn print_set(name: &str, labels: &[Label]) {
    let shown: Vec<String> = labels
        .iter()
        .map(|l| match l.value {
            Some(v) => format!("{}={}", l.name, v),
            None => l.name.clone(),
        })
        .collect();
    println!("{name} ({}): {{{}}}", labels.len(), shown.join(", "));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Multiparty PSI In-Memory Example ===\n");

    let delegate_set = vec![
        Label::with_value("a", 10),
        Label::with_value("b", 20),
        Label::with_value("c", 30),
    ];
    let party_sets = vec![
        vec![Label::new("b"), Label::new("c"), Label::new("d")],
        vec![Label::new("c"), Label::new("d"), Label::new("e")],
    ];

    print_set("Delegate", &delegate_set);
    for (i, set) in party_sets.iter().enumerate() {
        print_set(&format!("Party {}", i + 1), set);
    }

    let mut rng = rand::rngs::OsRng;
    let group = EcGroup::p256();
    println!("\nBuilding ElGamal context (3 moduli, 33-bit sums)...");
    let elgamal = Arc::new(ElGamal::new(group.clone(), 3, 33, &mut rng)?);
    println!("CRT moduli: {:?}", elgamal.moduli());

    let mut sets = vec![delegate_set.clone()];
    sets.extend(party_sets.iter().cloned());

    for variant in Variant::ALL {
        println!("\n=== {variant} ===");

        // === Phase 1: Key setup ===
        let session = Session::new(
            variant,
            N_BITS,
            delegate_set.clone(),
            party_sets.clone(),
            elgamal.clone(),
            &mut rng,
        )?;
        println!(
            "Initialized delegate and {} parties, map of {} slots",
            session.parties().len(),
            1u64 << N_BITS
        );

        // === Phase 2: DelegateStart ===
        let blinded = session.delegate_start(&mut rng)?;
        println!(
            "Delegate published L = {}",
            hex::encode(group.encode(&blinded.message().offset))
        );

        // === Phase 3: Party rounds and BlindEncrypt ===
        // In a real deployment each map would travel to the next party
        let reduced = blinded.party_rounds(&mut rng)?;
        let first = &reduced.shuffled().entries[0];
        println!(
            "Last party returned {} shuffled entries, first Q = {}..",
            reduced.shuffled().len(),
            &hex::encode(group.encode(&first.q))[..16]
        );

        // === Phase 4: DelegateFinish ===
        let unblinded = reduced.delegate_finish(&mut rng)?;
        println!("Delegate unblinded {} matching entries", unblinded.cardinality());

        // === Phase 5: Joint decryption ===
        let outcome = unblinded.joint_decryption()?;
        let (expected, expected_sum) = ground_truth(variant, &sets);

        println!("\nCardinality: {} (expected: {expected})", outcome.cardinality);
        if let Some(sum) = &outcome.sum {
            println!("Sum: {sum} (expected: {})", expected_sum.clone().unwrap_or_default());
        }
        println!(
            "✓ Verification: {}",
            if outcome.cardinality == expected && outcome.sum == expected_sum {
                "PASSED"
            } else {
                "FAILED"
            }
        );
    }

    Ok(())
}
