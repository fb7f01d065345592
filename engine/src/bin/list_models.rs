use sticker_engine::{Model, Style};
use strum::IntoEnumIterator;

pub fn main() {
    println!("# Models");
    for info in Model::catalog() {
        let default = if info.key == Model::default().key() {
            " (default)"
        } else {
            ""
        };
        println!("{}{default}: {}", info.key, info.name);
        println!("    {}", info.description);
        println!("    {}", info.id);
    }

    println!("\n# Styles");
    for style in Style::iter() {
        let llm = if style.uses_llm_enhancement() {
            " [llm]"
        } else {
            ""
        };
        println!("{style}{llm}: {}", style.positive());
    }
}
