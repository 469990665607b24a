//! PAC script evaluation.
//!
//! A boa [`Context`] is neither `Send` nor reentrant, so a single shared
//! instance behind a lock would serialize every resolution. Instead each
//! [`ScriptEvaluator`] owns a dedicated worker thread holding one context
//! parsed from the engine generation's script; calls travel over a channel and
//! come back over a oneshot. The [`EvaluatorPool`] hands evaluators out with
//! exclusive ownership and takes them back for reuse.

use std::net::{Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use boa_engine::{
    js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction, Source,
};
use regex::Regex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};

struct EvalJob {
    url: String,
    host: String,
    reply: oneshot::Sender<Result<String, String>>,
}

/// One non-reentrant PAC execution context.
///
/// Safe to call from exactly one owner at a time; the pool guarantees that by
/// construction. Dropping the evaluator closes its channel and the worker
/// thread exits.
pub struct ScriptEvaluator {
    jobs: mpsc::Sender<EvalJob>,
}

impl ScriptEvaluator {
    /// Spawn a worker thread, parse the script inside it, and wait for the
    /// parse outcome. A script that fails to parse is reported here, before
    /// the evaluator is ever handed out.
    pub(crate) async fn spawn(script: Arc<str>) -> ProxyResult<Self> {
        let (jobs, job_rx) = mpsc::channel::<EvalJob>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        std::thread::Builder::new()
            .name("pac-evaluator".to_string())
            .spawn(move || evaluator_main(script, job_rx, ready_tx))
            .map_err(|e| ProxyError::evaluation(format!("failed to spawn evaluator: {e}")))?;

        ready_rx
            .await
            .map_err(|_| ProxyError::evaluation("evaluator thread exited during startup"))?
            .map_err(ProxyError::evaluation)?;

        Ok(Self { jobs })
    }

    /// Execute `FindProxyForURL(url, host)` and return the raw directive.
    pub async fn find_proxy(&self, url: &str, host: &str) -> ProxyResult<String> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(EvalJob {
                url: url.to_string(),
                host: host.to_string(),
                reply,
            })
            .map_err(|_| ProxyError::evaluation("evaluator thread is gone"))?;

        response
            .await
            .map_err(|_| ProxyError::evaluation("evaluator dropped the reply"))?
            .map_err(ProxyError::evaluation)
    }
}

fn evaluator_main(
    script: Arc<str>,
    jobs: mpsc::Receiver<EvalJob>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut context = Context::default();

    let init = register_pac_runtime(&mut context).and_then(|_| {
        context
            .eval(Source::from_bytes(script.as_bytes()))
            .map(|_| ())
    });

    match init {
        Ok(()) => {
            let _ = ready.send(Ok(()));
        }
        Err(e) => {
            let _ = ready.send(Err(format!("failed to load PAC script: {e}")));
            return;
        }
    }

    while let Ok(job) = jobs.recv() {
        let result = call_find_proxy(&mut context, &job.url, &job.host)
            .map_err(|e| e.to_string());
        let _ = job.reply.send(result);
    }
}

fn call_find_proxy(context: &mut Context, url: &str, host: &str) -> JsResult<String> {
    let global = context.global_object();
    let func_val = global.get(js_string!("FindProxyForURL"), context)?;

    let func = func_val
        .as_callable()
        .ok_or_else(|| JsNativeError::typ().with_message("FindProxyForURL is not a function"))?;

    let args = [
        JsValue::from(js_string!(url)),
        JsValue::from(js_string!(host)),
    ];

    let result = func.call(&JsValue::undefined(), &args, context)?;
    let directive = result.to_string(context)?;

    Ok(directive.to_std_string().unwrap_or_default())
}

fn arg_string(args: &[JsValue], index: usize) -> String {
    args.get(index)
        .and_then(|v| v.as_string())
        .and_then(|s| s.to_std_string().ok())
        .unwrap_or_default()
}

/// Register the classic PAC helper functions scripts rely on.
fn register_pac_runtime(context: &mut Context) -> JsResult<()> {
    context.register_global_callable(
        "isPlainHostName".into(),
        1,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            Ok((!host.contains('.')).into())
        }),
    )?;

    context.register_global_callable(
        "dnsDomainIs".into(),
        2,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            let domain = arg_string(args, 1);
            let is_match = host.ends_with(&domain)
                && (host.len() == domain.len()
                    || domain.starts_with('.')
                    || host.as_bytes()[host.len() - domain.len() - 1] == b'.');
            Ok(is_match.into())
        }),
    )?;

    context.register_global_callable(
        "localHostOrDomainIs".into(),
        2,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            let domain = arg_string(args, 1);
            Ok((host == domain || domain.starts_with(&format!("{host}."))).into())
        }),
    )?;

    context.register_global_callable(
        "isResolvable".into(),
        1,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            Ok((host.as_str(), 0).to_socket_addrs().is_ok().into())
        }),
    )?;

    context.register_global_callable(
        "dnsResolve".into(),
        1,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            let ip = (host.as_str(), 0)
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .map(|addr| addr.ip().to_string());
            Ok(match ip {
                Some(ip) => js_string!(ip).into(),
                None => JsValue::null(),
            })
        }),
    )?;

    context.register_global_callable(
        "isInNet".into(),
        3,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let ip: Option<Ipv4Addr> = arg_string(args, 0).parse().ok();
            let net: Option<Ipv4Addr> = arg_string(args, 1).parse().ok();
            let mask: Option<Ipv4Addr> = arg_string(args, 2).parse().ok();

            let result = match (ip, net, mask) {
                (Some(ip), Some(net), Some(mask)) => {
                    let ip = u32::from_be_bytes(ip.octets());
                    let net = u32::from_be_bytes(net.octets());
                    let mask = u32::from_be_bytes(mask.octets());
                    (ip & mask) == (net & mask)
                }
                _ => false,
            };
            Ok(result.into())
        }),
    )?;

    context.register_global_callable(
        "dnsDomainLevels".into(),
        1,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let host = arg_string(args, 0);
            Ok(JsValue::from(host.matches('.').count() as i32))
        }),
    )?;

    context.register_global_callable(
        "myIpAddress".into(),
        0,
        NativeFunction::from_fn_ptr(|_this, _args, _ctx| {
            let socket = UdpSocket::bind("0.0.0.0:0").ok();
            let ip = socket
                .as_ref()
                .and_then(|s| s.connect("8.8.8.8:53").ok().map(|_| s))
                .and_then(|s| s.local_addr().ok())
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            Ok(js_string!(ip).into())
        }),
    )?;

    context.register_global_callable(
        "shExpMatch".into(),
        2,
        NativeFunction::from_fn_ptr(|_this, args, _ctx| {
            let value = arg_string(args, 0);
            let pattern = arg_string(args, 1);
            Ok(sh_exp_match(&value, &pattern).into())
        }),
    )?;

    Ok(())
}

/// Shell-expression match: `*` and `?` wildcards, everything else literal.
fn sh_exp_match(value: &str, pattern: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c if "\\.+()[]{}|^$".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');

    Regex::new(&regex)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Arena of [`ScriptEvaluator`]s with get-or-create acquire semantics.
///
/// Every evaluator in the pool is bound to the same script text; a reload
/// replaces the whole pool along with the rest of the engine generation.
pub struct EvaluatorPool {
    script: Arc<str>,
    idle: Mutex<Vec<ScriptEvaluator>>,
    spawned: AtomicUsize,
}

impl EvaluatorPool {
    /// Build a pool and eagerly validate the script by constructing the first
    /// evaluator. An unparseable script never produces a usable pool.
    pub async fn new(script: Arc<str>) -> ProxyResult<Self> {
        let first = ScriptEvaluator::spawn(Arc::clone(&script)).await?;
        Ok(Self {
            script,
            idle: Mutex::new(vec![first]),
            spawned: AtomicUsize::new(1),
        })
    }

    /// Take an idle evaluator, or construct a fresh one when none is free.
    /// The returned evaluator is exclusively owned until [`release`].
    ///
    /// [`release`]: EvaluatorPool::release
    pub async fn acquire(&self) -> ProxyResult<ScriptEvaluator> {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        match idle {
            Some(evaluator) => Ok(evaluator),
            None => {
                let evaluator = ScriptEvaluator::spawn(Arc::clone(&self.script)).await?;
                let total = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "spawned additional PAC evaluator");
                Ok(evaluator)
            }
        }
    }

    /// Return an evaluator to the idle set for reuse.
    pub fn release(&self, evaluator: ScriptEvaluator) {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(evaluator);
    }

    /// Total evaluators constructed over this pool's lifetime.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}
