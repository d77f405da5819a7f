//! Word counts over a crawl dump.
//!
//! Input lines are `url<TAB>page` where the page had its newlines encoded as
//! `:nl:`. Four flows:
//! - import: drop PDF urls, decode the page into `<output>/pages`
//! - count: per (url, word) into `<output>/urls`, per word into `<output>/words`
//! - two exports copying both counts to text files under `<local>/`

use crate::cascade::{Cascade, CascadeConnector};
use crate::error::Result;
use crate::flow::{Flow, FlowConnector, taps_map};
use crate::operation::{
    Aggregator, Filter, Function, Output, RegexFilter, RegexGenerator, RegexReplace,
    RegexSplitter, Selector,
};
use crate::pipe::{Assembly, Pipe};
use crate::tap::{Scheme, Tap};
use crate::tuple::FieldSet;

use super::child;

/// A letter, optionally followed by non-blank text that ends in a letter.
pub const WORD_PATTERN: &str = r"\p{L}(?:[^ ]*\p{L})?";

const SCRIPT_PATTERN: &str = r"(?is)<script\b[^>]*>.*?</script\s*>";
const TAG_PATTERN: &str = r"<[^>]*>";

fn fields(names: &[&str]) -> FieldSet {
    FieldSet::literal(names)
}

/// `line` -> `url`, `page`.
pub fn import_assembly(name: &str) -> Result<Pipe> {
    let pipe = Pipe::new(name)
        .each(
            fields(&["line"]),
            Function::Split(RegexSplitter::tabs(fields(&["url", "raw"]))?),
            Output::Results,
        )
        .filter(
            fields(&["url"]),
            Filter::Regex(RegexFilter::new(r".*\.pdf$", true)?),
        )
        // Pages are stored one per line with tab separated fields, so encoded
        // newlines and stray tabs both become spaces.
        .each(
            fields(&["raw"]),
            Function::Replace(RegexReplace::new(fields(&["page"]), ":nl:|\t", " ")?),
            Output::Fields(fields(&["url", "page"])),
        );
    Ok(pipe)
}

/// `url`, `page` -> tails `url pipe` (url, word, count) and `word pipe`
/// (word, count).
pub fn count_assembly(name: &str) -> Result<Assembly> {
    let words = Pipe::new(name)
        .each(
            fields(&["page"]),
            Function::Replace(RegexReplace::new(fields(&["body"]), SCRIPT_PATTERN, " ")?),
            Output::Fields(fields(&["url", "body"])),
        )
        .each(
            fields(&["body"]),
            Function::Replace(RegexReplace::new(fields(&["text"]), TAG_PATTERN, " ")?),
            Output::Fields(fields(&["url", "text"])),
        )
        .each(
            fields(&["text"]),
            Function::Generate(RegexGenerator::new(fields(&["word"]), WORD_PATTERN)?),
            Output::Fields(fields(&["url", "word"])),
        );

    let per_url = words
        .group_by_named("url pipe", fields(&["url", "word"]))
        .every(Aggregator::count());
    let per_word = words
        .group_by_named("word pipe", fields(&["word"]))
        .every(Aggregator::count());
    Ok(Assembly::new(vec![per_url, per_word]))
}

pub fn export_assembly() -> Pipe {
    Pipe::new("export pipe").each(Selector::All, Function::Identity, Output::Results)
}

pub fn flows(
    connector: &FlowConnector,
    input: &str,
    output: &str,
    local: &str,
) -> Result<Vec<Flow>> {
    let pages = Tap::new(Scheme::delimited(fields(&["url", "page"])), child(output, "pages"));
    let urls = Tap::new(
        Scheme::delimited(fields(&["url", "word", "count"])),
        child(output, "urls"),
    );
    let words = Tap::new(Scheme::delimited(fields(&["word", "count"])), child(output, "words"));

    let import = connector.connect(
        "import pages",
        Tap::new(Scheme::text_line(), input),
        pages.clone(),
        import_assembly("import pipe")?,
    )?;
    let count = connector.connect_many(
        "count",
        pages,
        taps_map(["url pipe", "word pipe"], [urls.clone(), words.clone()])?,
        count_assembly("wordcount pipe")?,
    )?;
    let export = export_assembly();
    let export_urls = connector.connect(
        "export urls",
        urls,
        Tap::new(Scheme::text_line(), child(local, "urls")),
        export.clone(),
    )?;
    let export_words = connector.connect(
        "export words",
        words,
        Tap::new(Scheme::text_line(), child(local, "words")),
        export,
    )?;
    Ok(vec![import, count, export_urls, export_words])
}

pub fn cascade(
    flows_with: &FlowConnector,
    cascades: &CascadeConnector,
    input: &str,
    output: &str,
    local: &str,
) -> Result<Cascade> {
    cascades.connect(flows(flows_with, input, output, local)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn words_keep_inner_punctuation() {
        let generator = RegexGenerator::new(fields(&["word"]), WORD_PATTERN).unwrap();
        let words: Vec<Value> = generator.generate("it's 42 (rust), x-ray!").collect();
        assert_eq!(
            words,
            vec![Value::from("it's"), Value::from("rust"), Value::from("x-ray")]
        );
    }
}
