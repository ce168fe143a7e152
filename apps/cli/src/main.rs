use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;

use listcraft_core_sdk::{
    controller::{self, Controller, Outcome, ProxyClient, Status, STATUS_GENERATING},
    db,
    models::{GenType, ListingConfig, ListingForm},
    prompt::{self, PromptKind},
    server, telemetry,
};

/**
 * \brief CLI 程序入口：生成 Amazon 标题与五点描述。
 */
#[derive(Parser, Debug)]
#[command(name = "listcraft", version, about = "Amazon listing title & bullet drafter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 修改生成配置（Provider、模型、温度、自定义端点）。
     */
    Configure {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        use_custom: Option<bool>,
        #[arg(long)]
        custom_endpoint: Option<String>,
        #[arg(long)]
        custom_api_key: Option<String>,
        /** \brief 保存开关，未开启时不写入本地存储 */
        #[arg(long, default_value_t = false)]
        save_config: bool,
        #[arg(long)]
        enable_telemetry: Option<bool>,
    },

    /**
     * \brief 显示已保存的配置与表单。
     */
    Show,

    /**
     * \brief 仅输出组装后的提示词，不调用模型。
     */
    Prompt {
        #[arg(long, value_enum, default_value_t = KindArg::Both)]
        kind: KindArg,
        #[command(flatten)]
        form: FormArgs,
        #[arg(long, default_value_t = false)]
        save_config: bool,
    },

    /**
     * \brief 通过本地代理生成标题与五点。
     */
    Generate {
        #[command(flatten)]
        form: FormArgs,
        #[arg(long, default_value = "http://127.0.0.1:5173")]
        proxy: String,
        #[arg(long, default_value_t = false)]
        save_config: bool,
    },

    /**
     * \brief 清空已保存表单中的四项输入。
     */
    Clear {
        #[arg(long, default_value_t = false)]
        save_config: bool,
    },

    /**
     * \brief 启动代理服务（POST /api/chat）。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[derive(Args, Debug, Default)]
struct FormArgs {
    #[arg(long)]
    keywords: Option<String>,
    /** \brief 产品说明 */
    #[arg(long)]
    features: Option<String>,
    #[arg(long)]
    comp_title: Option<String>,
    #[arg(long)]
    comp_bullets: Option<String>,
    #[arg(long = "type", value_enum)]
    gen_type: Option<KindArg>,
}

impl FormArgs {
    fn apply(self, form: &mut ListingForm) {
        if let Some(v) = self.keywords {
            form.keywords = v;
        }
        if let Some(v) = self.features {
            form.features = v;
        }
        if let Some(v) = self.comp_title {
            form.comp_title = v;
        }
        if let Some(v) = self.comp_bullets {
            form.comp_bullets = v;
        }
        if let Some(kind) = self.gen_type {
            form.gen_type = kind.into();
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Title,
    Bullets,
    Both,
}

impl From<KindArg> for GenType {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Title => GenType::Title,
            KindArg::Bullets => GenType::Bullets,
            KindArg::Both => GenType::Both,
        }
    }
}

impl From<KindArg> for PromptKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Title => PromptKind::Title,
            KindArg::Bullets => PromptKind::Bullets,
            KindArg::Both => PromptKind::Combined,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    let mut config = db::load_config(&conn).context("load config failed")?;
    let mut form = db::load_form(&conn)
        .context("load form failed")?
        .unwrap_or_default();

    match cli.command {
        Commands::Configure {
            provider,
            model,
            temperature,
            use_custom,
            custom_endpoint,
            custom_api_key,
            save_config,
            enable_telemetry,
        } => {
            if let Some(v) = provider {
                config.provider = v;
            }
            if let Some(v) = model {
                config.model = v;
            }
            if let Some(v) = temperature {
                config.temperature = v;
            }
            if let Some(v) = use_custom {
                config.use_custom = v;
            }
            if let Some(v) = custom_endpoint {
                config.custom_endpoint = v.trim().to_string();
            }
            if let Some(v) = custom_api_key {
                config.custom_api_key = v.trim().to_string();
            }
            if let Some(enabled) = enable_telemetry {
                db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
                telemetry::set_enabled(enabled);
            }
            let saved = db::save_state(&conn, &config, &form, save_config)
                .context("save config failed")?;
            print_config(&config);
            if !saved {
                println!("(not saved: pass --save-config to persist)");
            }
        }
        Commands::Show => {
            print_config(&config);
            println!();
            print_form(&form);
        }
        Commands::Prompt {
            kind,
            form: args,
            save_config,
        } => {
            let text = run_prompt(&conn, &config, &mut form, kind, args, save_config)?;
            println!("{}", text);
        }
        Commands::Generate {
            form: args,
            proxy,
            save_config,
        } => {
            args.apply(&mut form);
            db::save_state(&conn, &config, &form, save_config).context("save state failed")?;

            println!("{}", STATUS_GENERATING);
            let controller = Controller::new(ProxyClient::new(proxy));
            let outcome = controller.generate(&form, &config).await;

            report(outcome)?;
        }
        Commands::Clear { save_config } => {
            let status = controller::clear(&mut form);
            db::save_state(&conn, &config, &form, save_config).context("save state failed")?;
            print_status(&status);
        }
        Commands::Serve { addr } => {
            server::run(&addr).await?;
        }
    }

    Ok(())
}

/**
 * \brief 应用表单覆盖项，按保存开关持久化，返回组装后的提示词。
 */
fn run_prompt(
    conn: &Connection,
    config: &ListingConfig,
    form: &mut ListingForm,
    kind: KindArg,
    args: FormArgs,
    save_config: bool,
) -> Result<String> {
    args.apply(form);
    db::save_state(conn, config, form, save_config).context("save state failed")?;
    Ok(prompt::build_prompt(kind.into(), form))
}

/**
 * \brief 输出生成结果；错误状态转为 Err，由 main 返回非零退出码。
 */
fn report(outcome: Outcome) -> Result<()> {
    if let Some(title) = &outcome.title {
        println!("\nTitle ({} chars):\n{}", outcome.title_len(), title);
    }
    if let Some(bullets) = &outcome.bullets {
        println!("\nBullets:\n{}", bullets);
    }
    match outcome.status {
        Some(Status::Error(msg)) => bail!(msg),
        Some(status) => print_status(&status),
        None => {}
    }
    Ok(())
}

fn print_status(status: &Status) {
    match status {
        Status::Error(msg) => eprintln!("\nError: {}", msg),
        Status::Warn(msg) => eprintln!("\nWarning: {}", msg),
        Status::Info(msg) => println!("\n{}", msg),
    }
}

fn print_config(config: &ListingConfig) {
    println!("provider       = {}", config.provider);
    println!("model          = {}", config.model);
    println!("temperature    = {}", config.temperature);
    println!("useCustom      = {}", config.use_custom);
    println!("customEndpoint = {}", config.custom_endpoint);
    println!(
        "customApiKey   = {}",
        if config.custom_api_key.is_empty() {
            "(unset)"
        } else {
            "(set)"
        }
    );
}

fn print_form(form: &ListingForm) {
    println!("genType     = {:?}", form.gen_type);
    println!("keywords    = {}", form.keywords);
    println!("features    = {}", form.features);
    println!("compTitle   = {}", form.comp_title);
    println!("compBullets = {}", form.comp_bullets);
}
