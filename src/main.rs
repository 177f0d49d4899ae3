use log::{error, info};
use recent_items::transport::QueryParams;
use recent_items::{
    init_logger, load_config, parse_args, CliArgs, ComponentConfig, HttpRestClient, ListTemplate, MemoryContainer,
    RecentItemsComponent, WidgetContainer,
};
use serde_json::json;
use std::rc::Rc;
use tokio::task::LocalSet;

fn main() {
    let cli_args = parse_args();
    let config = match load_config(cli_args.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    init_logger(&cli_args.log_level(&config));

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    // ウィジェットの描画はすべて同じスレッドのローカルタスクで進める
    let local = LocalSet::new();
    if let Err(e) = local.block_on(&runtime, run(cli_args, config)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli_args: CliArgs, config: ComponentConfig) -> recent_items::Result<()> {
    let base_url = cli_args.base_url(&config);
    info!("Fetching recent items from {}", base_url);

    let client = Rc::new(HttpRestClient::new(&base_url));
    let component = RecentItemsComponent::new(config, client, Rc::new(ListTemplate));

    let container = MemoryContainer::with_embedded(json!({
        "args": {"widget_id": cli_args.widget_id},
        "instance": {"title": "Recent Posts", "count": cli_args.count},
        "posts": []
    }));
    let containers: Vec<Box<dyn WidgetContainer>> = vec![Box::new(container.clone())];
    component.set_up_widgets(containers);

    let Some(view) = component.widget(&cli_args.widget_id) else {
        return Err(recent_items::Error::MissingWidgetId);
    };

    let mut params = QueryParams::new();
    params.insert("per_page".to_string(), json!(view.count()));
    let added = view.collection().fetch(params).await?;
    info!("Fetched {} items", added);

    view.render_now().await?;
    println!("{}", container.get_html());
    Ok(())
}
