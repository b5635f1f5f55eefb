//! Walkthrough of a batch being formulated, first with a typed-in unit count
//! and then with the unit count derived from the ingredient weights.
//!
//! Run with `cargo run --example batch_walkthrough`.

use batch_formulation::batch_model::QuantityField;
use batch_formulation::derivation::Edit;
use batch_formulation::session::BatchSession;
use batch_formulation::unit_converter::WeightUnit;

fn show(title: &str, session: &BatchSession) {
    println!("=== {title} ===");
    print!("{}", session.state());
    println!("Total: {}", session.display_batch_weight());
    for advisory in session.advisories() {
        println!("  ! {advisory}");
    }
    println!();
}

fn commit(session: &mut BatchSession, edit: Edit) {
    session.edit(edit);
    session.settle();
}

fn main() {
    let mut session = BatchSession::new();

    commit(&mut session, Edit::SetBatchName("Dark 70%".into()));
    commit(&mut session, Edit::SetUnitWeight("100".into()));
    commit(&mut session, Edit::SetUnitCount("24".into()));
    commit(&mut session, Edit::name(0, "cocoa mass"));
    commit(&mut session, Edit::name(1, "sugar"));
    commit(&mut session, Edit::name(2, "cocoa butter"));
    commit(&mut session, Edit::quantity(1, QuantityField::Percentage, "25"));
    commit(&mut session, Edit::quantity(2, QuantityField::WeightPerUnit, "5"));
    show("Manual: cocoa mass takes the remainder", &session);

    commit(&mut session, Edit::ToggleAutoMode(true));
    commit(&mut session, Edit::quantity(0, QuantityField::TotalWeight, "1750"));
    show("Auto: unit count follows the ingredient weights", &session);

    session.set_weight_unit(WeightUnit::Pounds);
    session.focus_total_weight(0);
    session.type_total_weight(0, "4.");
    println!("While typing, cocoa mass shows: {:?}", session.display_total_weight(0));
    session.blur_total_weight(0);
    show("Auto, displayed in pounds", &session);
}
