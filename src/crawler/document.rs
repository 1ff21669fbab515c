//! Document queries over fetched HTML

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

/// Raw item anchor as found on a search page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLink {
    pub href: String,
    pub title: String,
    pub thumbnail: String,
}

/// Selector-level queries the pipeline needs from a document
///
/// Implementations only extract; URL resolution and filtering policy stay in
/// the pipeline.
pub trait DocumentQuery: Send + Sync {
    /// Candidate item anchors on a search result page
    fn item_links(&self, document: &str) -> Vec<ItemLink>;

    /// Asset sources on an item page, in document order
    fn asset_links(&self, document: &str) -> Vec<String>;

    /// Hrefs of pagination anchors
    fn pagination_links(&self, document: &str) -> Vec<String>;
}

static ITEM_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".item-link, a.item-link, .post-item a").expect("static item selector is valid")
});
static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".item-title, .post-title, h2, h3").expect("static title selector is valid")
});
static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("static img selector is valid"));
static ASSET_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("#masonry .post-item img, .post-item-img, .post-content img, article img")
        .expect("static asset selector is valid")
});
static PAGINATION_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href*='/search/']").expect("static pagination selector is valid")
});

/// [`DocumentQuery`] backed by the `scraper` HTML parser
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlQuery;

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl DocumentQuery for HtmlQuery {
    fn item_links(&self, document: &str) -> Vec<ItemLink> {
        let html = Html::parse_document(document);

        html.select(&ITEM_SELECTOR)
            .filter_map(|anchor| {
                let href = non_empty(anchor.value().attr("href"))?;

                let title = anchor
                    .select(&TITLE_SELECTOR)
                    .map(text_of)
                    .find(|t| !t.is_empty())
                    .or_else(|| non_empty(anchor.value().attr("title")))
                    .unwrap_or_else(|| text_of(anchor));

                let thumbnail = anchor
                    .select(&IMG_SELECTOR)
                    .next()
                    .and_then(|img| {
                        non_empty(img.value().attr("src"))
                            .or_else(|| non_empty(img.value().attr("data-src")))
                    })
                    .unwrap_or_default();

                Some(ItemLink {
                    href,
                    title,
                    thumbnail,
                })
            })
            .collect()
    }

    fn asset_links(&self, document: &str) -> Vec<String> {
        let html = Html::parse_document(document);

        html.select(&ASSET_SELECTOR)
            .filter_map(|img| {
                non_empty(img.value().attr("data-src"))
                    .or_else(|| non_empty(img.value().attr("src")))
            })
            .collect()
    }

    fn pagination_links(&self, document: &str) -> Vec<String> {
        let html = Html::parse_document(document);

        html.select(&PAGINATION_SELECTOR)
            .filter_map(|a| non_empty(a.value().attr("href")))
            .collect()
    }
}
