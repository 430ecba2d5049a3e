use crate::adapters;

/// Execute the `components` command: list the inputs, transforms and
/// outputs a pipeline may `use`.
pub fn execute() {
    let registry = adapters::registry();

    print_section("Inputs", registry.source_names());
    print_section("Transforms", registry.transform_names());
    print_section("Outputs", registry.sink_names());
}

fn print_section<'a>(title: &str, names: impl Iterator<Item = &'a str>) {
    println!("{title}:");
    for name in names {
        println!("  {name}");
    }
}
