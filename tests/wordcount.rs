use std::sync::Arc;

use logflow::recipes::wordcount;
use logflow::tap::MemoryStorage;
use logflow::{CancellationToken, CascadeConnector, EngineConfig, FlowConnector};
use pretty_assertions::assert_eq;

#[test]
fn counts_words_per_page_and_overall() {
    let storage = Arc::new(MemoryStorage::new());
    storage.insert(
        "crawl.txt",
        [
            concat!(
                "http://a.com/\t<html><body><p>Hello world</p>:nl:",
                "<script>var x;</script><p>hello again</p></body></html>",
            ),
            "http://b.com/doc.pdf\t<body>ignored</body>",
            "http://c.com/\t<body>world</body>",
        ],
    );

    let config = EngineConfig {
        map_tasks: 2,
        ..EngineConfig::default()
    };
    let cascade = wordcount::cascade(
        &FlowConnector::new(config.clone()),
        &CascadeConnector::new(config),
        "crawl.txt",
        "out",
        "local",
    )
    .unwrap();
    assert_eq!(cascade.flows().len(), 4);
    let stats = cascade
        .complete(storage.clone(), &CancellationToken::new())
        .unwrap();
    assert_eq!(stats.completed.len(), 4);

    assert_eq!(storage.lines("out/pages").unwrap().len(), 2);
    assert_eq!(
        storage.lines("local/urls").unwrap(),
        vec![
            "http://a.com/\tHello\t1",
            "http://a.com/\tagain\t1",
            "http://a.com/\thello\t1",
            "http://a.com/\tworld\t1",
            "http://c.com/\tworld\t1",
        ]
    );
    assert_eq!(
        storage.lines("local/words").unwrap(),
        vec!["Hello\t1", "again\t1", "hello\t1", "world\t2"]
    );
}
