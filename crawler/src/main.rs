use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "lupa-crawler")]
#[command(about = "Fetch pages politely into a corpus directory of <doc_id>.html files")]
struct Cli {
    /// File with seed URLs, one per line
    #[arg(long)]
    seeds: String,
    /// Corpus directory the indexer will consume
    #[arg(long, default_value = "./corpus")]
    corpus: String,
    /// Number of pages to collect
    #[arg(long, default_value_t = 1000)]
    max_docs: usize,
    /// Maximum link depth from the seeds
    #[arg(long, default_value_t = 3)]
    depth_limit: usize,
    /// Minimum seconds between two requests to the same domain
    #[arg(long, default_value_t = 20)]
    min_interval_secs: u64,
    /// Number of concurrent fetch workers
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// User-Agent for robots.txt and page fetches
    #[arg(long, default_value = "lupa-bot/0.1 (+https://example.com/bot)")]
    user_agent: String,
}

/// What the scheduler hands a worker: a URL ready to fetch, a request to
/// wait out a politeness window, or the signal that the frontier is empty.
enum NextUrl {
    Ready(Url, usize),
    Wait,
    Exhausted,
}

/// Per-domain FIFO frontier with a minimum interval between requests to
/// the same domain. Single producer of fetch work; fetch outcomes feed
/// discovered links back through `report_fetch_result`.
struct Scheduler {
    queues: HashMap<String, VecDeque<(Url, usize)>>,
    last_access: HashMap<String, Instant>,
    discovered: HashSet<String>,
    min_interval: Duration,
    depth_limit: usize,
    page_limit: usize,
    page_count: usize,
}

impl Scheduler {
    fn new(min_interval: Duration, depth_limit: usize, page_limit: usize) -> Self {
        Self {
            queues: HashMap::new(),
            last_access: HashMap::new(),
            discovered: HashSet::new(),
            min_interval,
            depth_limit,
            page_limit,
            page_count: 0,
        }
    }

    /// Queues a URL unless it is too deep, already discovered, or has no
    /// host. Discovered URLs stay discovered even after leaving the queue.
    fn add_url(&mut self, url: Url, depth: usize) -> bool {
        if depth >= self.depth_limit {
            return false;
        }
        let key = normalized(&url);
        if self.discovered.contains(&key) {
            return false;
        }
        let Some(host) = url.host_str().map(str::to_string) else {
            return false;
        };
        self.discovered.insert(key);
        self.queues.entry(host).or_default().push_back((url, depth));
        true
    }

    fn has_finished_crawl(&self) -> bool {
        self.page_count >= self.page_limit
    }

    fn count_fetched_page(&mut self) {
        self.page_count += 1;
    }

    fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    /// Pops the first queued URL whose domain is outside its politeness
    /// window and stamps the domain as accessed now.
    fn next_url(&mut self) -> NextUrl {
        if self.queues.values().all(VecDeque::is_empty) {
            return NextUrl::Exhausted;
        }
        for (host, queue) in self.queues.iter_mut() {
            if queue.is_empty() {
                continue;
            }
            let accessible = self
                .last_access
                .get(host)
                .map_or(true, |at| at.elapsed() >= self.min_interval);
            if !accessible {
                continue;
            }
            if let Some((url, depth)) = queue.pop_front() {
                self.last_access.insert(host.clone(), Instant::now());
                return NextUrl::Ready(url, depth);
            }
        }
        NextUrl::Wait
    }

    /// Absorbs the links extracted from a fetched page, one level deeper
    /// than the page itself.
    fn report_fetch_result(&mut self, depth: usize, links: Vec<Url>) {
        for link in links {
            self.add_url(link, depth + 1);
        }
    }
}

fn normalized(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[derive(Debug, Clone, Default)]
struct RobotsRules {
    allows: Vec<String>,
    disallows: Vec<String>,
    crawl_delay_ms: Option<u64>,
}

impl RobotsRules {
    /// Minimal parser for the `*` user-agent group.
    fn parse(txt: &str) -> Self {
        let mut rules = Self::default();
        let mut active = false;
        for line in txt.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "user-agent" => active = value == "*",
                "allow" if active => rules.allows.push(value.to_string()),
                "disallow" if active => rules.disallows.push(value.to_string()),
                "crawl-delay" if active => {
                    if let Ok(secs) = value.parse::<f64>() {
                        rules.crawl_delay_ms = Some((secs * 1000.0) as u64);
                    }
                }
                _ => {}
            }
        }
        rules
    }

    /// Longest matching Allow prefix wins over a shorter Disallow.
    fn allows_path(&self, path: &str) -> bool {
        let best_allow = longest_prefix(&self.allows, path);
        let best_disallow = longest_prefix(&self.disallows, path);
        match (best_allow, best_disallow) {
            (Some(allow), Some(disallow)) => allow >= disallow,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }
}

fn longest_prefix(rules: &[String], path: &str) -> Option<usize> {
    rules
        .iter()
        .filter(|rule| !rule.is_empty() && path.starts_with(rule.as_str()))
        .map(String::len)
        .max()
}

type RobotsCache = Arc<RwLock<HashMap<String, RobotsRules>>>;

async fn robots_for(client: &Client, cache: &RobotsCache, url: &Url, ua: &str) -> RobotsRules {
    let Some(host) = url.host_str().map(str::to_string) else {
        return RobotsRules::default();
    };
    if let Some(rules) = cache.read().get(&host) {
        return rules.clone();
    }
    let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
    let txt = match client
        .get(&robots_url)
        .header(header::USER_AGENT, ua)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        _ => String::new(),
    };
    let rules = RobotsRules::parse(&txt);
    cache.write().insert(host, rules.clone());
    rules
}

/// Fetched page body plus the links it carries; `None` body when the page
/// was disallowed, failed, or is not HTML.
async fn fetch_page(
    client: Client,
    cache: RobotsCache,
    ua: String,
    url: Url,
) -> (Option<String>, Vec<Url>) {
    let rules = robots_for(&client, &cache, &url, &ua).await;
    if !rules.allows_path(url.path()) {
        return (None, Vec::new());
    }
    if let Some(delay) = rules.crawl_delay_ms {
        sleep(Duration::from_millis(delay)).await;
    }

    let resp = match client.get(url.clone()).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        _ => return (None, Vec::new()),
    };
    if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
        if let Ok(value) = ct.to_str() {
            if !value.starts_with("text/html") {
                return (None, Vec::new());
            }
        }
    }
    let bytes = match resp.bytes().await {
        Ok(bytes) if bytes.len() <= 2 * 1024 * 1024 => bytes,
        _ => return (None, Vec::new()),
    };
    let body = String::from_utf8_lossy(&bytes).to_string();

    let link_selector = Selector::parse("a").expect("valid selector");
    let doc = Html::parse_document(&body);
    let mut links = Vec::new();
    for anchor in doc.select(&link_selector) {
        if let Some(href) = anchor.value().attr("href") {
            if let Ok(link) = Url::parse(href).or_else(|_| url.join(href)) {
                if link.scheme().starts_with("http") {
                    links.push(link);
                }
            }
        }
    }
    (Some(body), links)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    fs::create_dir_all(&args.corpus)
        .with_context(|| format!("creating corpus directory {}", args.corpus))?;

    let client = Client::builder()
        .user_agent(args.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let mut scheduler = Scheduler::new(
        Duration::from_secs(args.min_interval_secs),
        args.depth_limit,
        args.max_docs,
    );
    let seeds = File::open(&args.seeds)
        .with_context(|| format!("opening seeds file {}", args.seeds))?;
    for line in BufReader::new(seeds).lines() {
        let line = line?.trim().to_string();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = Url::parse(&line).or_else(|_| Url::parse(&format!("https://{line}")));
        if let Ok(url) = url {
            scheduler.add_url(url, 0);
        }
    }
    if scheduler.discovered_count() == 0 {
        bail!("no valid seeds");
    }
    tracing::info!(
        seeds = scheduler.discovered_count(),
        max_docs = args.max_docs,
        depth_limit = args.depth_limit,
        concurrency = args.concurrency,
        "crawl starting"
    );

    let robots_cache: RobotsCache = Arc::new(RwLock::new(HashMap::new()));
    let mut workers: JoinSet<(usize, Option<String>, Vec<Url>)> = JoinSet::new();
    let mut next_doc_id: u32 = 0;

    while !scheduler.has_finished_crawl() {
        let mut politeness_wait = false;
        while workers.len() < args.concurrency {
            match scheduler.next_url() {
                NextUrl::Ready(url, depth) => {
                    let client = client.clone();
                    let cache = robots_cache.clone();
                    let ua = args.user_agent.clone();
                    workers.spawn(async move {
                        let (page, links) = fetch_page(client, cache, ua, url).await;
                        (depth, page, links)
                    });
                }
                NextUrl::Wait => {
                    politeness_wait = true;
                    break;
                }
                NextUrl::Exhausted => break,
            }
        }

        if workers.is_empty() {
            if politeness_wait {
                sleep(Duration::from_millis(500)).await;
                continue;
            }
            // Frontier exhausted with nothing in flight: the crawl is over.
            break;
        }

        if let Some(joined) = workers.join_next().await {
            let (depth, page, links) = joined.context("fetch worker panicked")?;
            scheduler.report_fetch_result(depth, links);
            if let Some(body) = page {
                let doc_id = next_doc_id;
                next_doc_id += 1;
                let path = format!("{}/{doc_id}.html", args.corpus);
                fs::write(&path, &body).with_context(|| format!("writing {path}"))?;
                scheduler.count_fetched_page();
                if scheduler.page_count % 100 == 0 {
                    tracing::info!(
                        pages = scheduler.page_count,
                        discovered = scheduler.discovered_count(),
                        "crawl progress"
                    );
                }
            }
        }
    }

    tracing::info!(
        pages = scheduler.page_count,
        discovered = scheduler.discovered_count(),
        corpus = %args.corpus,
        "crawl finished"
    );
    Ok(())
}
