use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

enum TimeoutArg {
    Secs(LitInt),
    Paused(Ident),
}

impl Parse for TimeoutArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(LitInt) {
            return input.parse().map(TimeoutArg::Secs);
        }
        let ident: Ident = input.parse()?;
        if ident == "paused" {
            Ok(TimeoutArg::Paused(ident))
        } else {
            Err(syn::Error::new_spanned(
                ident,
                "expected a timeout in seconds or `paused`",
            ))
        }
    }
}

struct TimeoutArgs {
    secs: u64,
    paused: bool,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        for arg in Punctuated::<TimeoutArg, Token![,]>::parse_terminated(input)? {
            match arg {
                TimeoutArg::Secs(lit) => {
                    let secs: u64 = lit.base10_parse()?;
                    if secs == 0 {
                        return Err(syn::Error::new_spanned(
                            lit,
                            "timeout must be greater than zero",
                        ));
                    }
                    args.secs = secs;
                }
                TimeoutArg::Paused(_) => args.paused = true,
            }
        }
        Ok(args)
    }
}

/// Runs an async test on its own current-thread runtime and fails it if it
/// does not finish within the wall-clock timeout (default 60s).
///
/// `#[tokio_timeout_test(10, paused)]` starts the runtime with tokio time
/// paused, so interval-driven code advances instantly. In that mode only the
/// wall-clock guard applies; virtual sleeps never count against it.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let TimeoutArgs { secs, paused } = parse_macro_input!(attr as TimeoutArgs);

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let body = if paused {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move #block);
        }
    } else {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(timeout_duration, async move #block)
                    .await
                    .expect("test timed out");
            });
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
