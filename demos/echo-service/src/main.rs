//! MateCORBA Echo Service Example
//!
//! Serves an `Echo` object over IIOP, calls one given its stringified IOR,
//! or does both in one process.
//!
//! ```text
//! interface Echo {
//!     exception Refused { string reason; };
//!     string echo(in string text);
//!     string reverse(in string text);
//!     unsigned long calls();
//!     void refuse(in string reason) raises (Refused);
//! };
//! ```
//!
//! ORB options (`-ORBGIOPVersion 1.1`, `-ORBMaxFragmentSize 256`, ...) may
//! be mixed with the demo's own options.
//!
//! Usage:
//!   echo-service serve --port 2809
//!   echo-service call IOR:000000...
//!   echo-service self-test

use clap::{Parser, Subcommand};
use matecorba::{
    BasicServant, Endpoint, Environment, Exception, MethodReply, ObjectRef, OperationDesc, Orb,
    OrbConfig, ServantClass, ServantRef, TypeCode, UserException, Value,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ECHO_REPO_ID: &str = "IDL:MateCORBA/Demo/Echo:1.0";
const REFUSED_REPO_ID: &str = "IDL:MateCORBA/Demo/Echo/Refused:1.0";

#[derive(Parser, Debug)]
#[command(name = "echo-service", about = "MateCORBA echo service")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an Echo object and print its IOR
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
    /// Call a remote Echo object
    Call {
        /// Stringified IOR of the target
        ior: String,
    },
    /// Serve and call in one process, over the loopback interface
    SelfTest,
}

fn refused() -> TypeCode {
    TypeCode::exception(REFUSED_REPO_ID, "Refused", [("reason", TypeCode::string(0))])
}

fn echo_op() -> OperationDesc {
    OperationDesc::new("echo")
        .param_in("text", TypeCode::string(0))
        .returns(TypeCode::string(0))
}

fn reverse_op() -> OperationDesc {
    OperationDesc::new("reverse")
        .param_in("text", TypeCode::string(0))
        .returns(TypeCode::string(0))
}

fn calls_op() -> OperationDesc {
    OperationDesc::new("calls").returns(TypeCode::ulong())
}

fn refuse_op() -> OperationDesc {
    OperationDesc::new("refuse")
        .param_in("reason", TypeCode::string(0))
        .raises(refused())
}

fn text_arg(req: &matecorba::ServerRequest) -> String {
    req.arg(0).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn create_servant() -> ServantRef {
    let calls = Arc::new(AtomicU32::new(0));
    let echo_calls = calls.clone();
    let reverse_calls = calls.clone();

    let class = ServantClass::builder(ECHO_REPO_ID)
        .method(echo_op(), move |req| {
            echo_calls.fetch_add(1, Ordering::Relaxed);
            async move {
                let text = text_arg(&req);
                info!("echo called with {} characters", text.len());
                Ok(MethodReply::value(text))
            }
        })
        .method(reverse_op(), move |req| {
            reverse_calls.fetch_add(1, Ordering::Relaxed);
            async move {
                let text: String = text_arg(&req).chars().rev().collect();
                info!("reverse called");
                Ok(MethodReply::value(text))
            }
        })
        .method(calls_op(), move |_req| {
            let count = calls.load(Ordering::Relaxed);
            async move { Ok(MethodReply::value(count)) }
        })
        .method(refuse_op(), |req| async move {
            let reason = text_arg(&req);
            info!("refusing: {}", reason);
            let ex = UserException::new(refused(), Value::Struct(vec![Value::String(reason)]))
                .map_err(|e| Exception::System(e.to_system_exception()))?;
            Err(Exception::User(ex))
        })
        .build();
    BasicServant::with_finalizer(class, || info!("echo servant finalized"))
}

/// Activate the servant on the root POA and start listening
async fn serve(orb: &Orb, host: &str, port: u16) -> Result<ObjectRef, Box<dyn std::error::Error>> {
    let poa = orb.root_poa();
    let servant = create_servant();
    poa.activate_object(servant.clone())?;
    let endpoint = orb.listen(&Endpoint::new(host, port)).await?;
    poa.the_poa_manager().activate()?;
    info!("Echo service listening on {}", endpoint);
    Ok(poa.servant_to_reference(&servant)?)
}

async fn call(echo: &ObjectRef) -> Result<(), Box<dyn std::error::Error>> {
    let mut env = Environment::new();

    if !echo.is_a(ECHO_REPO_ID).await? {
        return Err(format!("target is not an {}", ECHO_REPO_ID).into());
    }

    info!("Test 1: echo");
    let reply = echo
        .invoke(&echo_op(), &[Value::from("Hello, MateCORBA!")], &mut env)
        .await
        .ok_or_else(|| format!("echo failed: {:?}", env.exception()))?;
    info!("  echo returned {:?}", reply.result.as_str());

    info!("Test 2: reverse");
    let reply = echo
        .invoke(&reverse_op(), &[Value::from("hello")], &mut env)
        .await
        .ok_or_else(|| format!("reverse failed: {:?}", env.exception()))?;
    info!("  reverse returned {:?}", reply.result.as_str());

    info!("Test 3: declared user exception");
    let reply = echo
        .invoke(&refuse_op(), &[Value::from("not today")], &mut env)
        .await;
    match (reply, env.user_exception()) {
        (None, Some(ex)) => info!(
            "  raised {} with reason {:?}",
            ex.repo_id(),
            ex.member("reason").and_then(matecorba::Value::as_str)
        ),
        _ => return Err("refuse did not raise Refused".into()),
    }
    env.clear();

    info!("Test 4: call counter");
    let reply = echo
        .invoke(&calls_op(), &[], &mut env)
        .await
        .ok_or_else(|| format!("calls failed: {:?}", env.exception()))?;
    info!("  servant has handled {:?} calls", reply.result.as_u32());

    info!("All calls succeeded");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, args) = OrbConfig::from_args(std::env::args());
    let cli = Cli::parse_from(args);

    let level: Level = cli.log_level.parse()?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (orb, _) = Orb::init(Vec::<String>::new(), config)?;

    match cli.command {
        Command::Serve { host, port } => {
            let echo = serve(&orb, &host, port).await?;
            println!("{}", orb.object_to_string(&echo)?);
            tokio::select! {
                _ = orb.run() => {}
                _ = tokio::signal::ctrl_c() => info!("interrupted"),
            }
        }
        Command::Call { ior } => {
            let echo = orb.string_to_object(&ior)?;
            call(&echo).await?;
        }
        Command::SelfTest => {
            let echo = serve(&orb, "127.0.0.1", 0).await?;
            // go through the stringified form, as a separate client would
            let ior = orb.object_to_string(&echo)?;
            let echo = orb.string_to_object(&ior)?;
            call(&echo).await?;
        }
    }

    orb.shutdown(true).await?;
    Ok(())
}
